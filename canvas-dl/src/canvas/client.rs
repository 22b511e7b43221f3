//! A Canvas client which talks to a live Canvas instance over HTTP.

use super::{
    parse_listing, Canvas, Course, CourseId, File, Folder, FolderId, Module, ModuleId, ModuleItem,
    Raw, Resource,
};
use crate::cookies::CookieJar;
use anyhow::{Context, Error};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use surf::{http::Method, StatusCode, Url};

/// Give up on a request after this many redirects.
const MAX_REDIRECTS: usize = 10;

/// Extra data requested along with each course.
const COURSE_INCLUDES: &[&str] = &[
    "needs_grading_count",
    "syllabus_body",
    "public_description",
    "total_scores",
    "current_grading_period_scores",
    "grading_periods",
    "term",
    "account",
    "course_progress",
    "sections",
    "storage_quota_used_mb",
    "total_students",
    "passback_status",
    "favorites",
    "teachers",
    "observed_users",
    "tabs",
    "course_image",
    "banner_image",
    "concluded",
    "post_manually",
];

/// Extra data requested along with each file.
const FILE_INCLUDES: &[&str] = &["user", "usage_rights"];

/// A Canvas client.
///
/// Requests are authenticated with browser session cookies.
pub struct Client {
    client: surf::Client,
    api: Url,
    cookies: CookieJar,
}

impl Client {
    /// Connect to the Canvas instance at `site`.
    pub fn new(site: Url, cookies: CookieJar) -> Result<Self, Error> {
        let mut api = check_absolute(site)?;
        if !api.path().ends_with('/') {
            let path = format!("{}/", api.path());
            api.set_path(&path);
        }
        let api = api.join("api/v1/")?;
        Ok(Self {
            client: surf::Client::new(),
            api,
            cookies,
        })
    }

    /// Parse the URL of a Canvas site, which must be absolute.
    pub fn parse_site(site: &str) -> Result<Url, Error> {
        check_absolute(site.parse().map_err(|_| Error::msg(NOT_ABSOLUTE))?)
    }

    /// The root of the REST API.
    pub fn api_url(&self) -> &Url {
        &self.api
    }

    /// Resolve an API endpoint.
    ///
    /// Relative paths are interpreted relative to the API root; absolute URLs are used as is.
    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        match path.parse::<Url>() {
            Ok(url) => Ok(url),
            Err(_) => Ok(self.api.join(path)?),
        }
    }

    /// Send a `GET` request, following redirects.
    ///
    /// Cookies are recomputed for every hop, so that session cookies are never sent to third-party
    /// hosts (like the storage service file downloads redirect to).
    async fn get(&self, mut url: Url) -> Result<surf::Response, Error> {
        for _ in 0..=MAX_REDIRECTS {
            let mut req = surf::Request::new(Method::Get, url.clone());
            if let Some(cookie) = self.cookies.header_for(&url) {
                req.insert_header("Cookie", cookie);
            }
            tracing::debug!(%url, "Canvas request");
            let res = self.client.send(req).await.map_err(Error::msg)?;
            let status = res.status();
            if status.is_redirection() {
                let location = res.header("Location").ok_or_else(|| {
                    Error::msg(format!("redirect from {url} ({status}) has no location"))
                })?;
                url = url.join(location.last().as_str())?;
                continue;
            }
            if !status.is_success() {
                return Err(request_failed(&url, status));
            }
            return Ok(res);
        }
        Err(Error::msg(format!("too many redirects, last URL {url}")))
    }

    /// Fetch a single page of a paginated listing.
    ///
    /// Returns the items on the page and the URL of the next page, if there is one.
    async fn page<T: Resource>(&self, url: Url) -> Result<(Vec<Raw<T>>, Option<Url>), Error> {
        let mut res = self.get(url.clone()).await?;
        let next = match res.header("Link") {
            Some(links) => links
                .iter()
                .find_map(|link| next_link(link.as_str()))
                .map(|next| url.join(next))
                .transpose()?,
            None => None,
        };
        let body = res.body_string().await.map_err(Error::msg)?;
        let items = serde_json::from_str(&body)
            .map_err(Error::from)
            .and_then(parse_listing)
            .with_context(|| format!("malformed response from {url}"))?;
        Ok((items, next))
    }

    /// Stream every item of a paginated listing.
    ///
    /// `params` are sent with the first request only; the URLs of subsequent pages, taken from the
    /// `Link` header, already include them.
    ///
    /// <https://developerdocs.instructure.com/services/canvas/basics/file.pagination>
    fn paginate<T: Resource>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> BoxStream<'_, Result<Raw<T>, Error>> {
        let first = self.endpoint(endpoint).map(|mut url| {
            if !params.is_empty() {
                url.query_pairs_mut().extend_pairs(params);
            }
            url
        });
        stream::try_unfold(Some(first), move |next| async move {
            let url = match next {
                Some(url) => url?,
                None => return Ok(None),
            };
            let (items, next) = self.page::<T>(url).await?;
            tracing::debug!("got page of {} items", items.len());
            let items = stream::iter(items.into_iter().map(Ok::<_, Error>));
            Ok::<_, Error>(Some((items, next.map(Ok))))
        })
        .try_flatten()
        .boxed()
    }
}

#[async_trait]
impl Canvas for Client {
    fn list_courses(&self) -> BoxStream<'_, Result<Raw<Course>, Error>> {
        let params = COURSE_INCLUDES
            .iter()
            .map(|include| ("include[]", *include))
            .collect::<Vec<_>>();
        self.paginate("courses", &params)
    }

    /// <https://developerdocs.instructure.com/services/canvas/resources/files#method.folders.list_all_folders>
    fn list_course_folders(&self, course: CourseId) -> BoxStream<'_, Result<Raw<Folder>, Error>> {
        self.paginate(&format!("courses/{course}/folders"), &[])
    }

    /// <https://developerdocs.instructure.com/services/canvas/resources/files#method.files.api_index>
    fn list_folder_files(&self, folder: FolderId) -> BoxStream<'_, Result<Raw<File>, Error>> {
        let params = FILE_INCLUDES
            .iter()
            .map(|include| ("include[]", *include))
            .collect::<Vec<_>>();
        self.paginate(&format!("folders/{folder}/files"), &params)
    }

    fn list_course_modules(&self, course: CourseId) -> BoxStream<'_, Result<Raw<Module>, Error>> {
        self.paginate(&format!("courses/{course}/modules"), &[])
    }

    fn list_module_items(
        &self,
        course: CourseId,
        module: ModuleId,
    ) -> BoxStream<'_, Result<Raw<ModuleItem>, Error>> {
        self.paginate(&format!("courses/{course}/modules/{module}/items"), &[])
    }

    async fn download(&self, file: &File) -> Result<Vec<u8>, Error> {
        let url = self.endpoint(&file.url)?;
        let mut res = self.get(url).await?;
        res.body_bytes().await.map_err(Error::msg)
    }
}

const NOT_ABSOLUTE: &str = "url not absolute (are you missing 'https://' at the start?)";

fn check_absolute(url: Url) -> Result<Url, Error> {
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(Error::msg(NOT_ABSOLUTE));
    }
    Ok(url)
}

fn request_failed(url: &Url, status: StatusCode) -> Error {
    Error::msg(format!("request to {url} failed ({status})"))
}

/// Find the target of the `rel="next"` link in a `Link` header.
///
/// The header is a comma-separated list of entries of the form `<url>; rel="name"; ...`
/// ([RFC 8288](https://www.rfc-editor.org/rfc/rfc8288)).
fn next_link(header: &str) -> Option<&str> {
    let mut rest = header;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let end = after.find('>')?;
        let target = &after[..end];
        let tail = &after[end + 1..];
        let params_end = tail.find('<').unwrap_or(tail.len());
        if tail[..params_end].split(';').any(is_rel_next) {
            return Some(target);
        }
        rest = &tail[params_end..];
    }
    None
}

fn is_rel_next(param: &str) -> bool {
    let Some((key, value)) = param.split_once('=') else {
        return false;
    };
    key.trim().eq_ignore_ascii_case("rel")
        && value
            .trim()
            .trim_end_matches(',')
            .trim()
            .trim_matches('"')
            .split_whitespace()
            .any(|rel| rel.eq_ignore_ascii_case("next"))
}
