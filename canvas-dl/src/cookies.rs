//! Session cookies exported from a browser in the Netscape `cookies.txt` format.

use anyhow::{Context, Error};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use surf::Url;

/// Prefix marking `HttpOnly` cookies, which would otherwise look like comments.
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// A single cookie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub name: String,
    pub value: String,
}

impl Cookie {
    /// Should this cookie be sent with a request to `url`?
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        if self.secure && url.scheme() != "https" {
            return false;
        }
        self.domain_matches(&host.to_ascii_lowercase()) && self.path_matches(url.path())
    }

    fn domain_matches(&self, host: &str) -> bool {
        let domain = self.domain.to_ascii_lowercase();
        let bare = domain.trim_start_matches('.');
        if host == bare {
            return true;
        }
        (self.include_subdomains || domain.starts_with('.'))
            && host
                .strip_suffix(bare)
                .is_some_and(|prefix| prefix.ends_with('.'))
    }

    fn path_matches(&self, path: &str) -> bool {
        let Some(rest) = path.strip_prefix(self.path.as_str()) else {
            return false;
        };
        rest.is_empty() || self.path.ends_with('/') || rest.starts_with('/')
    }
}

impl FromStr for Cookie {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.strip_prefix(HTTP_ONLY_PREFIX).unwrap_or(line);
        let fields = line.split('\t').collect::<Vec<_>>();
        let [domain, include_subdomains, path, secure, _expires, name, value] = fields[..] else {
            return Err(Error::msg(format!(
                "expected 7 tab-separated fields, got {}",
                fields.len()
            )));
        };
        Ok(Self {
            domain: domain.into(),
            include_subdomains: parse_flag(include_subdomains)?,
            path: path.into(),
            secure: parse_flag(secure)?,
            name: name.into(),
            value: value.into(),
        })
    }
}

fn parse_flag(flag: &str) -> Result<bool, Error> {
    match flag {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(Error::msg(format!("invalid flag {flag:?}, expected TRUE or FALSE"))),
    }
}

/// A set of cookies loaded from a Netscape cookie file.
///
/// Expiry dates are ignored, so that cookies from a session which the browser still considers
/// alive keep working even if they were exported as session cookies.
#[derive(Clone, Debug, Default)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    /// Load cookies from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read cookie file {}", path.display()))?;
        contents
            .parse()
            .with_context(|| format!("malformed cookie file {}", path.display()))
    }

    /// All cookies in the jar.
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// The value of the `Cookie` header to send with a request to `url`, if any.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let header = self
            .cookies
            .iter()
            .filter(|cookie| cookie.matches(url))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ");
        if header.is_empty() {
            None
        } else {
            Some(header)
        }
    }
}

impl FromStr for CookieJar {
    type Err = Error;

    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let mut lines = contents.lines().enumerate();
        let magic = lines.next().map(|(_, line)| line.trim()).unwrap_or_default();
        if !is_magic(magic) {
            return Err(Error::msg(
                "does not look like a Netscape format cookies file",
            ));
        }

        let mut cookies = vec![];
        for (i, line) in lines {
            let line = line.trim_end_matches(['\r', '\n']);
            let trimmed = line.trim_start();
            if trimmed.is_empty()
                || (trimmed.starts_with(['#', '$']) && !line.starts_with(HTTP_ONLY_PREFIX))
            {
                continue;
            }
            let cookie = line
                .parse()
                .with_context(|| format!("invalid cookie on line {}", i + 1))?;
            cookies.push(cookie);
        }
        tracing::debug!("loaded {} cookies", cookies.len());
        Ok(Self { cookies })
    }
}

/// Does `line` match `#( Netscape)? HTTP Cookie File`?
fn is_magic(line: &str) -> bool {
    let Some(rest) = line.strip_prefix('#') else {
        return false;
    };
    let rest = rest.strip_prefix(" Netscape").unwrap_or(rest);
    rest.starts_with(" HTTP Cookie File")
}

#[cfg(test)]
mod test {
    use super::*;

    const JAR: &str = "# Netscape HTTP Cookie File\n\
        # This is a generated file! Do not edit.\n\
        \n\
        canvas.example.edu\tFALSE\t/\tTRUE\t0\tcanvas_session\tabc123\n\
        #HttpOnly_.example.edu\tTRUE\t/\tFALSE\t1700000000\tlog_session_id\txyz\n\
        canvas.example.edu\tFALSE\t/api\tFALSE\t0\t_csrf_token\tt0k\n\
        other.org\tFALSE\t/\tFALSE\t0\tforeign\tnope\n";

    fn url(s: &str) -> Url {
        s.parse().unwrap()
    }

    #[test]
    fn test_load() {
        let jar: CookieJar = JAR.parse().unwrap();
        assert_eq!(jar.cookies().len(), 4);
        assert_eq!(
            jar.cookies()[1],
            Cookie {
                domain: ".example.edu".into(),
                include_subdomains: true,
                path: "/".into(),
                secure: false,
                name: "log_session_id".into(),
                value: "xyz".into(),
            }
        );
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        fs::write(&path, JAR).unwrap();
        assert_eq!(CookieJar::load(&path).unwrap().cookies().len(), 4);
        CookieJar::load(dir.path().join("missing.txt")).unwrap_err();
    }

    #[test]
    fn test_bad_files() {
        "name=value\n".parse::<CookieJar>().unwrap_err();
        "# HTTP Cookie File\nfoo\tbar\n".parse::<CookieJar>().unwrap_err();
        "# HTTP Cookie File\na\tMAYBE\t/\tFALSE\t0\tn\tv\n"
            .parse::<CookieJar>()
            .unwrap_err();
        assert!("# HTTP Cookie File\n"
            .parse::<CookieJar>()
            .unwrap()
            .cookies()
            .is_empty());
    }

    #[test]
    fn test_indented_comments() {
        let jar: CookieJar = "# Netscape HTTP Cookie File\n  \
            # exported by hand\n\
            \t# tabbed\n\
            $Version=1\n\
            canvas.example.edu\tFALSE\t/\tTRUE\t0\tcanvas_session\tabc123\n"
            .parse()
            .unwrap();
        assert_eq!(jar.cookies().len(), 1);
        assert_eq!(jar.cookies()[0].name, "canvas_session");
    }

    #[test]
    fn test_header_for() {
        let jar: CookieJar = JAR.parse().unwrap();
        assert_eq!(
            jar.header_for(&url("https://canvas.example.edu/api/v1/courses"))
                .unwrap(),
            "canvas_session=abc123; log_session_id=xyz; _csrf_token=t0k"
        );
        // Secure cookies are withheld over plain HTTP, and `/api` does not match `/apis`.
        assert_eq!(
            jar.header_for(&url("http://canvas.example.edu/apis")).unwrap(),
            "log_session_id=xyz"
        );
        // Subdomain matching only applies to domain cookies.
        assert_eq!(
            jar.header_for(&url("https://files.example.edu/x")).unwrap(),
            "log_session_id=xyz"
        );
        assert_eq!(jar.header_for(&url("https://notexample.edu/")), None);
        assert_eq!(jar.header_for(&url("https://sub.other.org/")), None);
    }
}
