//! Canvas resources, as returned by the REST API.
//!
//! Only the fields we rely on are modeled; everything else survives in the [`Raw`](super::Raw)
//! JSON.

use super::{CourseId, FileId, FolderId, ModuleId, ModuleItemId, Resource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use surf::Url;

/// A course.
///
/// <https://developerdocs.instructure.com/services/canvas/resources/courses#course>
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub uuid: String,
    pub name: String,
    pub course_code: String,
    #[serde(default)]
    pub original_name: Option<String>,
    pub workflow_state: String,
    pub account_id: i64,
    pub root_account_id: i64,
    pub enrollment_term_id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub total_students: Option<u64>,
    #[serde(default)]
    pub image_download_url: Option<String>,
    #[serde(default)]
    pub banner_image_download_url: Option<String>,
}

impl Resource for Course {
    /// Courses outside their access dates (typically past terms) are listed with only an ID.
    fn is_restricted(raw: &Value) -> bool {
        raw.get("access_restricted_by_date") == Some(&Value::Bool(true))
    }

    /// Course image URLs are signed with a `token` which changes on every request.
    fn normalize_for_hash(raw: &mut Value) {
        for key in ["image_download_url", "banner_image_download_url"] {
            let Some(Value::String(url)) = raw.get_mut(key) else {
                continue;
            };
            // Leave the URL alone if for some reason it can't be parsed.
            if let Ok(parsed) = url.parse::<Url>() {
                *url = without_query_param(parsed, "token").to_string();
            }
        }
    }
}

fn without_query_param(mut url: Url, param: &str) -> Url {
    let kept = url
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect::<Vec<_>>();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url
}

/// A folder in a course's file storage.
///
/// <https://developerdocs.instructure.com/services/canvas/resources/files>
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    /// The path of this folder from the root of the course files, separated by `/`.
    pub full_name: String,
    pub parent_folder_id: Option<FolderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub files_count: u64,
    pub folders_count: u64,
    pub files_url: String,
    pub folders_url: String,
    pub locked: bool,
    pub locked_for_user: bool,
}

impl Resource for Folder {}

/// A file.
///
/// <https://developerdocs.instructure.com/services/canvas/resources/files>
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct File {
    pub id: FileId,
    pub uuid: String,
    pub display_name: String,
    pub filename: String,
    #[serde(default, rename = "content-type")]
    pub content_type: Option<String>,
    /// Download URL, which redirects to the actual contents.
    pub url: String,
    /// File size in bytes.
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub unlock_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lock_at: Option<DateTime<Utc>>,
    pub locked: bool,
    pub hidden: bool,
    pub hidden_for_user: bool,
    /// Identifier for the file in a third-party transcoding service.
    #[serde(default)]
    pub media_entry_id: Option<String>,
}

impl Resource for File {}

/// A module, grouping items in a course.
///
/// <https://developerdocs.instructure.com/services/canvas/resources/modules>
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    /// Position of this module in the course, starting from 1.
    pub position: u32,
    pub name: String,
    #[serde(default)]
    pub unlock_at: Option<DateTime<Utc>>,
    /// Whether module items must be unlocked in order.
    pub require_sequential_progress: bool,
    pub requirement_type: String,
    #[serde(default)]
    pub prerequisite_module_ids: Vec<ModuleId>,
    pub items_count: u64,
    pub items_url: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub publish_final_grade: Option<bool>,
}

impl Resource for Module {}

/// The kind of object a [`ModuleItem`] refers to.
#[derive(
    Clone, Copy, Debug, Display, PartialEq, Eq, Hash, EnumString, Deserialize, Serialize,
)]
pub enum ModuleItemType {
    File,
    Page,
    Discussion,
    Assignment,
    Quiz,
    SubHeader,
    ExternalUrl,
    ExternalTool,
}

/// An entry in a [`Module`].
///
/// <https://developerdocs.instructure.com/services/canvas/resources/modules>
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ModuleItem {
    pub id: ModuleItemId,
    pub module_id: ModuleId,
    /// Position of this item in the module, starting from 1.
    pub position: u32,
    pub title: String,
    /// Indent level, starting from 0, used to show a hierarchy.
    pub indent: u32,
    #[serde(rename = "type")]
    pub ty: ModuleItemType,
    /// The ID of the object referred to, for `File`, `Discussion`, `Assignment`, `Quiz` and
    /// `ExternalTool` items.
    #[serde(default)]
    pub content_id: Option<i64>,
    /// Link to the item in the Canvas web UI.
    pub html_url: String,
    /// Link to the Canvas API object, if applicable.
    #[serde(default)]
    pub url: Option<String>,
    /// Locator for the linked wiki page (only for `Page` items).
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub completion_requirement: Option<Value>,
    #[serde(default)]
    pub content_details: Option<Value>,
}

impl Resource for ModuleItem {}
