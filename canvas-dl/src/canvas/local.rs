//! A Canvas client which reads from the local file system instead of the Canvas API.

use super::{
    parse_listing, Canvas, Course, CourseId, File, Folder, FolderId, Module, ModuleId, ModuleItem,
    Raw, Resource,
};
use anyhow::{Context, Error};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A Canvas client which reads from the local file system instead of the Canvas API.
///
/// The directory mirrors the layout of the API:
///
/// ```text
/// DIR/
///     courses.json
///     courses/<course>/folders.json
///     courses/<course>/modules.json
///     courses/<course>/modules/<module>/items.json
///     folders/<folder>/files.json
///     files/<file>/content
/// ```
///
/// Each `.json` file holds the JSON array the corresponding endpoint would return, with all pages
/// concatenated. A missing listing is treated as empty.
pub struct LocalClient {
    root: PathBuf,
}

impl LocalClient {
    /// Open a local Canvas mirror.
    pub fn open(root: PathBuf) -> Self {
        Self { root }
    }

    fn listing<T: Resource>(
        &self,
        path: impl AsRef<Path>,
    ) -> BoxStream<'static, Result<Raw<T>, Error>> {
        let path = self.root.join(path);
        stream::once(async move { read_listing::<T>(&path) })
            .map_ok(|items| stream::iter(items.into_iter().map(Ok::<_, Error>)))
            .try_flatten()
            .boxed()
    }
}

fn read_listing<T: Resource>(path: &Path) -> Result<Vec<Raw<T>>, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!("{} does not exist, treating as empty", path.display());
            return Ok(vec![]);
        }
        Err(err) => {
            return Err(Error::from(err).context(format!("unable to read {}", path.display())))
        }
    };
    serde_json::from_str(&contents)
        .map_err(Error::from)
        .and_then(parse_listing)
        .with_context(|| format!("listing {} is malformed", path.display()))
}

#[async_trait]
impl Canvas for LocalClient {
    fn list_courses(&self) -> BoxStream<'_, Result<Raw<Course>, Error>> {
        self.listing("courses.json")
    }

    fn list_course_folders(&self, course: CourseId) -> BoxStream<'_, Result<Raw<Folder>, Error>> {
        self.listing(format!("courses/{course}/folders.json"))
    }

    fn list_folder_files(&self, folder: FolderId) -> BoxStream<'_, Result<Raw<File>, Error>> {
        self.listing(format!("folders/{folder}/files.json"))
    }

    fn list_course_modules(&self, course: CourseId) -> BoxStream<'_, Result<Raw<Module>, Error>> {
        self.listing(format!("courses/{course}/modules.json"))
    }

    fn list_module_items(
        &self,
        course: CourseId,
        module: ModuleId,
    ) -> BoxStream<'_, Result<Raw<ModuleItem>, Error>> {
        self.listing(format!("courses/{course}/modules/{module}/items.json"))
    }

    async fn download(&self, file: &File) -> Result<Vec<u8>, Error> {
        let path = self.root.join(format!("files/{}/content", file.id));
        fs::read(&path).with_context(|| format!("unable to read {}", path.display()))
    }
}
