use canvas_dl::{
    canvas::{Client, LocalClient},
    cookies::CookieJar,
    db, init_logging, sync,
};
use clap::Parser;
use std::path::PathBuf;
use surf::Url;

/// Download the files of every Canvas course you can see, and optionally archive their metadata.
#[derive(Debug, Parser)]
#[clap(version)]
enum Command {
    /// Pull files from a Canvas instance, authenticating with browser cookies.
    Pull {
        /// The Canvas site, e.g. https://canvas.example.edu.
        #[clap(env = "CANVAS_DL_SITE", value_parser = Client::parse_site)]
        site: Url,

        /// Session cookies exported from a logged-in browser, in Netscape `cookies.txt` format.
        #[clap(
            short,
            long,
            env = "CANVAS_DL_COOKIES",
            value_name = "FILE",
            default_value = "./cookies.txt",
            value_parser = existing_file
        )]
        cookies: PathBuf,

        #[clap(flatten)]
        sync: sync::Options,

        #[clap(flatten)]
        db: db::Options,
    },
    /// Read files from a local mirror of the Canvas API instead of a live instance.
    Read {
        /// The path to the directory containing the mirror.
        ///
        /// This should be a directory with the structure
        ///
        ///     DIR/
        ///         courses.json
        ///         courses/<course>/folders.json
        ///         courses/<course>/modules.json
        ///         courses/<course>/modules/<module>/items.json
        ///         folders/<folder>/files.json
        ///         files/<file>/content
        #[clap(env = "CANVAS_DL_MIRROR", value_name = "MIRROR")]
        dir: PathBuf,

        #[clap(flatten)]
        sync: sync::Options,

        #[clap(flatten)]
        db: db::Options,
    },
}

fn existing_file(path: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("{} does not exist or is not a file", path.display()))
    }
}

#[async_std::main]
async fn main() -> Result<(), anyhow::Error> {
    init_logging();

    let summary = match Command::parse() {
        Command::Pull {
            site,
            cookies,
            sync: opt,
            db,
        } => {
            let client = Client::new(site, CookieJar::load(cookies)?)?;
            tracing::info!("pulling from {}", client.api_url());
            let db = db.open()?;
            sync::sync(&client, db.as_ref(), &opt).await?
        }
        Command::Read {
            dir,
            sync: opt,
            db,
        } => {
            let client = LocalClient::open(dir);
            let db = db.open()?;
            sync::sync(&client, db.as_ref(), &opt).await?
        }
    };
    println!("{summary}");

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli() {
        Command::command().debug_assert();

        let dir = tempfile::tempdir().unwrap();
        let cookies = dir.path().join("cookies.txt");
        std::fs::write(&cookies, "# HTTP Cookie File\n").unwrap();
        let cookies = cookies.to_str().unwrap();

        match Command::try_parse_from([
            "canvas-dl",
            "pull",
            "https://canvas.example.edu",
            "--cookies",
            cookies,
            "-o",
            "out",
            "--db",
            "canvas.sqlite",
        ])
        .unwrap()
        {
            Command::Pull {
                site,
                cookies: parsed,
                sync,
                db,
            } => {
                assert_eq!(site.as_str(), "https://canvas.example.edu/");
                assert_eq!(parsed, PathBuf::from(cookies));
                assert_eq!(sync.out, PathBuf::from("out"));
                assert!(!sync.overwrite);
                assert_eq!(db.db_path, Some(PathBuf::from("canvas.sqlite")));
            }
            Command::Read { .. } => panic!("expected pull"),
        }

        // Relative sites and missing cookie files are rejected.
        Command::try_parse_from(["canvas-dl", "pull", "canvas.example.edu", "-c", cookies])
            .unwrap_err();
        Command::try_parse_from([
            "canvas-dl",
            "pull",
            "https://canvas.example.edu",
            "-c",
            "/definitely/not/here.txt",
        ])
        .unwrap_err();
    }
}
