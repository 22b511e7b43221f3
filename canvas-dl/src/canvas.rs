//! Facilities for pulling data from Canvas.

use anyhow::Error;
use async_trait::async_trait;
use derive_more::{Display, From, Into};
use futures::stream::BoxStream;
use serde::{
    de::{DeserializeOwned, Deserializer, Error as _},
    Deserialize, Serialize, Serializer,
};
use serde_json::Value;
use std::ops::Deref;

mod client;
mod local;
mod models;

pub use client::Client;
pub use local::LocalClient;
pub use models::*;

/// A Canvas client.
///
/// Listing operations yield items lazily, fetching further pages only as the stream is consumed.
#[async_trait]
pub trait Canvas: Sync {
    /// List all courses visible to the current user.
    fn list_courses(&self) -> BoxStream<'_, Result<Raw<Course>, Error>>;

    /// List all folders in a course.
    fn list_course_folders(&self, course: CourseId) -> BoxStream<'_, Result<Raw<Folder>, Error>>;

    /// List the files directly contained in a folder.
    fn list_folder_files(&self, folder: FolderId) -> BoxStream<'_, Result<Raw<File>, Error>>;

    /// List the modules of a course.
    fn list_course_modules(&self, course: CourseId) -> BoxStream<'_, Result<Raw<Module>, Error>>;

    /// List the items in a module.
    fn list_module_items(
        &self,
        course: CourseId,
        module: ModuleId,
    ) -> BoxStream<'_, Result<Raw<ModuleItem>, Error>>;

    /// Download the contents of a file.
    async fn download(&self, file: &File) -> Result<Vec<u8>, Error>;
}

macro_rules! id_type {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(
                Clone,
                Copy,
                Debug,
                Display,
                PartialEq,
                Eq,
                PartialOrd,
                Ord,
                Hash,
                From,
                Into,
                Deserialize,
                Serialize,
            )]
            #[serde(transparent)]
            pub struct $name(pub i64);
        )*
    };
}

id_type!(
    /// Identifies a course.
    CourseId,
    /// Identifies a folder.
    FolderId,
    /// Identifies a file.
    FileId,
    /// Identifies a module.
    ModuleId,
    /// Identifies an item in a module.
    ModuleItemId,
);

/// A Canvas resource type.
pub trait Resource: DeserializeOwned + Send + 'static {
    /// Transform the raw JSON of this resource before it is hashed for change detection.
    ///
    /// Some resources contain fields which change on every request without the resource itself
    /// changing (e.g. signed URLs). This hook removes them so that such a resource is not
    /// considered modified.
    fn normalize_for_hash(_raw: &mut Value) {}

    /// Whether a listing entry is a placeholder for a resource we are not allowed to see.
    ///
    /// Such entries lack most fields of the resource, so they are skipped rather than parsed.
    fn is_restricted(_raw: &Value) -> bool {
        false
    }
}

/// Parse the entries of a listing, skipping restricted ones.
pub(crate) fn parse_listing<T: Resource>(entries: Vec<Value>) -> Result<Vec<Raw<T>>, Error> {
    entries
        .into_iter()
        .filter(|raw| {
            if T::is_restricted(raw) {
                let id = raw.get("id").unwrap_or(&Value::Null);
                tracing::warn!("skipping restricted entry {id}");
                false
            } else {
                true
            }
        })
        .map(Raw::from_json)
        .collect()
}

/// A resource along with the exact JSON it was parsed from.
///
/// Canvas responses carry many more fields than we model. `Raw` keeps all of them, so that
/// archived data is complete and a resource serializes back to exactly what the server sent.
#[derive(Clone, Debug, PartialEq)]
pub struct Raw<T> {
    data: T,
    raw: Value,
}

impl<T: Resource> Raw<T> {
    /// Parse a resource from JSON.
    pub fn from_json(raw: Value) -> Result<Self, Error> {
        let data = T::deserialize(&raw)?;
        Ok(Self { data, raw })
    }

    /// The JSON this resource was parsed from.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The JSON used to detect changes to this resource.
    pub fn hash_normalized(&self) -> Value {
        let mut raw = self.raw.clone();
        T::normalize_for_hash(&mut raw);
        raw
    }
}

impl<T> Deref for Raw<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<'de, T: Resource> Deserialize<'de> for Raw<T> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Self::from_json(Value::deserialize(d)?).map_err(D::Error::custom)
    }
}

impl<T> Serialize for Raw<T> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(s)
    }
}
