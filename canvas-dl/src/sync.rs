//! Mirroring course files, and archiving metadata along the way.

use crate::{
    canvas::{Canvas, Course, File, Folder, Raw, Resource},
    db::{Db, Key, Table},
    path::local_path,
};
use anyhow::{Context, Error};
use chrono::{DateTime, Utc};
use clap::{builder::FalseyValueParser, Args};
use futures::TryStreamExt;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::PathBuf;

/// Options controlling what gets downloaded, and where.
#[derive(Clone, Debug, Args)]
#[group(id = "sync_options")]
pub struct Options {
    /// Save files under DIR, in `DIR/<course id>/<folder>/<file>`.
    #[clap(short, long, env = "CANVAS_DL_OUT", value_name = "DIR", default_value = ".")]
    pub out: PathBuf,

    /// Download files even if a file of the expected size already exists locally.
    #[clap(long, env = "CANVAS_DL_OVERWRITE", value_parser = FalseyValueParser::new())]
    pub overwrite: bool,

    /// Only archive metadata, don't download any files.
    #[clap(long, env = "CANVAS_DL_METADATA_ONLY", value_parser = FalseyValueParser::new())]
    pub metadata_only: bool,
}

/// Counts of what happened during a sync.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub courses: usize,
    /// Courses whose folders could not be listed.
    pub courses_failed: usize,
    pub folders: usize,
    /// Folders whose files could not be listed.
    pub folders_failed: usize,
    pub files_downloaded: usize,
    /// Files which already existed locally.
    pub files_skipped: usize,
    pub files_failed: usize,
    pub modules: usize,
    pub module_items: usize,
    /// Resources whose metadata was new or changed since the last sync.
    pub new_versions: usize,
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{} courses ({} failed), {} folders ({} failed), {} files downloaded, {} skipped, {} \
             failed",
            self.courses,
            self.courses_failed,
            self.folders,
            self.folders_failed,
            self.files_downloaded,
            self.files_skipped,
            self.files_failed,
        )?;
        if self.modules > 0 {
            write!(f, ", {} modules ({} items)", self.modules, self.module_items)?;
        }
        write!(f, ", {} new versions", self.new_versions)
    }
}

/// Download the files of every course visible through `canvas`.
///
/// If `db` is given, metadata about every course, folder, file, module and module item is saved
/// to it. Failing to list the folders of a course, the files in a folder or to download a file is
/// logged, counted in the [`Summary`] and skipped; other errors abort the sync. Courses outside
/// their access dates are skipped.
pub async fn sync<C: Canvas>(
    canvas: &C,
    db: Option<&Db>,
    opt: &Options,
) -> Result<Summary, Error> {
    let mut sync = Syncer {
        canvas,
        db,
        opt,
        summary: Summary::default(),
    };

    let seen = Utc::now();
    let mut courses = canvas.list_courses();
    while let Some(course) = courses.try_next().await? {
        sync.course(course, seen).await?;
    }
    tracing::info!("{}", sync.summary);
    Ok(sync.summary)
}

struct Syncer<'a, C> {
    canvas: &'a C,
    db: Option<&'a Db>,
    opt: &'a Options,
    summary: Summary,
}

impl<'a, C: Canvas> Syncer<'a, C> {
    async fn course(&mut self, course: Raw<Course>, seen: DateTime<Utc>) -> Result<(), Error> {
        tracing::info!("course {}: {}", course.id, course.name);
        self.summary.courses += 1;
        if let Some(db) = self.db {
            self.record(db.courses(), course.id, &course, seen)?;
        }

        let canvas = self.canvas;
        let seen = Utc::now();
        let mut folders = canvas.list_course_folders(course.id);
        loop {
            match folders.try_next().await {
                Ok(Some(folder)) => self.folder(&course, folder, seen).await?,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!("error listing folders for course {}: {err:#}", course.id);
                    self.summary.courses_failed += 1;
                    break;
                }
            }
        }

        if self.db.is_some() {
            self.modules(&course).await?;
        }
        Ok(())
    }

    async fn folder(
        &mut self,
        course: &Course,
        folder: Raw<Folder>,
        seen: DateTime<Utc>,
    ) -> Result<(), Error> {
        tracing::info!("folder {}", folder.full_name);
        self.summary.folders += 1;
        if let Some(db) = self.db {
            self.record(db.folders(), folder.id, &folder, seen)?;
        }

        let canvas = self.canvas;
        let seen = Utc::now();
        let mut files = canvas.list_folder_files(folder.id);
        loop {
            match files.try_next().await {
                Ok(Some(file)) => self.file(course, &folder, file, seen).await?,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(
                        "error listing files for folder {} ({}): {err:#}",
                        folder.full_name,
                        folder.id
                    );
                    self.summary.folders_failed += 1;
                    break;
                }
            }
        }
        Ok(())
    }

    async fn file(
        &mut self,
        course: &Course,
        folder: &Folder,
        file: Raw<File>,
        seen: DateTime<Utc>,
    ) -> Result<(), Error> {
        if let Some(db) = self.db {
            self.record(db.files(), file.id, &file, seen)?;
        }
        if self.opt.metadata_only {
            return Ok(());
        }

        let path = local_path(&self.opt.out, course.id, &folder.full_name, &file.filename);
        if !self.opt.overwrite {
            if let Ok(meta) = fs::metadata(&path) {
                if meta.is_file() && meta.len() == file.size {
                    tracing::debug!("{} already exists, skipping", path.display());
                    self.summary.files_skipped += 1;
                    return Ok(());
                }
            }
        }

        tracing::info!("{}", path.display());
        let contents = match self.canvas.download(&file).await {
            Ok(contents) => contents,
            Err(err) => {
                tracing::error!("failed downloading {}: {err:#}", file.display_name);
                self.summary.files_failed += 1;
                return Ok(());
            }
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("unable to create directory {}", parent.display()))?;
        }
        fs::write(&path, contents)
            .with_context(|| format!("unable to write {}", path.display()))?;
        self.summary.files_downloaded += 1;
        Ok(())
    }

    /// Archive the modules of a course, and their items.
    async fn modules(&mut self, course: &Course) -> Result<(), Error> {
        let Some(db) = self.db else {
            return Ok(());
        };

        let seen = Utc::now();
        let modules: Vec<_> = match self.canvas.list_course_modules(course.id).try_collect().await
        {
            Ok(modules) => modules,
            Err(err) => {
                tracing::warn!("error listing modules for course {}: {err:#}", course.id);
                return Ok(());
            }
        };
        for module in modules {
            self.summary.modules += 1;
            self.record(db.modules(), (module.id, course.id), &module, seen)?;

            let seen = Utc::now();
            let items: Vec<_> = match self
                .canvas
                .list_module_items(course.id, module.id)
                .try_collect()
                .await
            {
                Ok(items) => items,
                Err(err) => {
                    tracing::warn!("error listing items for module {}: {err:#}", module.name);
                    continue;
                }
            };
            for item in items {
                self.summary.module_items += 1;
                self.record(
                    db.module_items(),
                    (item.id, course.id, module.id),
                    &item,
                    seen,
                )?;
            }
        }
        Ok(())
    }

    fn record<T: Resource, K: Key>(
        &mut self,
        table: Table<'_, T, K>,
        key: K,
        item: &Raw<T>,
        seen: DateTime<Utc>,
    ) -> Result<(), Error> {
        let (written, version) = table.insert_at(key, item, seen, false)?;
        if written {
            tracing::debug!("saved version {version}");
            self.summary.new_versions += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::canvas::{CourseId, FileId, FolderId, LocalClient, ModuleId, ModuleItemId};
    use serde_json::{json, Value};
    use std::path::Path;

    fn write_json(root: &Path, path: &str, value: Value) {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, value.to_string()).unwrap();
    }

    fn course(id: i64, name: &str) -> Value {
        json!({
            "id": id,
            "uuid": format!("c{id}"),
            "name": name,
            "course_code": format!("CS {id}"),
            "workflow_state": "available",
            "account_id": 1,
            "root_account_id": 1,
            "enrollment_term_id": 1,
            "created_at": "2024-01-01T00:00:00Z",
        })
    }

    fn folder(id: i64, full_name: &str) -> Value {
        json!({
            "id": id,
            "name": full_name.rsplit('/').next().unwrap(),
            "full_name": full_name,
            "parent_folder_id": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "files_count": 1,
            "folders_count": 0,
            "files_url": "",
            "folders_url": "",
            "locked": false,
            "locked_for_user": false,
        })
    }

    fn file(id: i64, filename: &str, size: u64) -> Value {
        json!({
            "id": id,
            "uuid": format!("u{id}"),
            "display_name": filename,
            "filename": filename,
            "url": format!("https://canvas.example.edu/files/{id}/download"),
            "size": size,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "modified_at": "2024-01-01T00:00:00Z",
            "locked": false,
            "hidden": false,
            "hidden_for_user": false,
        })
    }

    /// A small course with a little bit of everything, including some broken parts.
    fn mirror(root: &Path) {
        write_json(
            root,
            "courses.json",
            json!([
                course(1, "Intro to Rust"),
                // A past course, which Canvas lists without any details.
                { "id": 3, "access_restricted_by_date": true },
                course(2, "Broken"),
            ]),
        );
        fs::create_dir_all(root.join("courses/2")).unwrap();
        fs::write(root.join("courses/2/folders.json"), "garbage").unwrap();
        write_json(
            root,
            "courses/1/folders.json",
            json!([
                folder(10, "course files"),
                folder(11, "course files/Week 1: Ownership"),
                folder(12, "course files/broken"),
            ]),
        );
        write_json(
            root,
            "folders/10/files.json",
            json!([file(100, "syllabus.pdf", 8), file(101, "missing.txt", 4)]),
        );
        write_json(
            root,
            "folders/11/files.json",
            json!([file(110, "borrow?.rs", 11)]),
        );
        fs::create_dir_all(root.join("folders/12")).unwrap();
        fs::write(root.join("folders/12/files.json"), "not json").unwrap();
        fs::create_dir_all(root.join("files/100")).unwrap();
        fs::write(root.join("files/100/content"), "syllabus").unwrap();
        fs::create_dir_all(root.join("files/110")).unwrap();
        fs::write(root.join("files/110/content"), "fn main(){}").unwrap();

        write_json(
            root,
            "courses/1/modules.json",
            json!([{
                "id": 5,
                "position": 1,
                "name": "Week 1",
                "require_sequential_progress": false,
                "requirement_type": "all",
                "prerequisite_module_ids": [],
                "items_count": 1,
                "items_url": "",
            }]),
        );
        write_json(
            root,
            "courses/1/modules/5/items.json",
            json!([{
                "id": 50,
                "module_id": 5,
                "position": 1,
                "title": "Syllabus",
                "indent": 0,
                "type": "File",
                "content_id": 100,
                "html_url": "https://canvas.example.edu/courses/1/modules/items/50",
                "content_details": {},
            }]),
        );
    }

    #[async_std::test]
    async fn test_sync() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        mirror(src.path());
        let canvas = LocalClient::open(src.path().into());
        let db = Db::open_in_memory().unwrap();
        let opt = Options {
            out: out.path().into(),
            overwrite: false,
            metadata_only: false,
        };

        let summary = sync(&canvas, Some(&db), &opt).await.unwrap();
        assert_eq!(
            summary,
            Summary {
                courses: 2,
                courses_failed: 1,
                folders: 3,
                folders_failed: 1,
                files_downloaded: 2,
                files_skipped: 0,
                files_failed: 1,
                modules: 1,
                module_items: 1,
                // 2 courses, 3 folders, 3 files, 1 module, 1 item
                new_versions: 10,
            }
        );
        assert_eq!(
            fs::read_to_string(out.path().join("1/course files/syllabus.pdf")).unwrap(),
            "syllabus"
        );
        assert_eq!(
            fs::read_to_string(out.path().join("1/course files/Week 1꞉ Ownership/borrow？.rs"))
                .unwrap(),
            "fn main(){}"
        );
        assert_eq!(db.courses().get(CourseId(1)).unwrap().unwrap().name, "Intro to Rust");
        assert!(db.courses().get(CourseId(3)).unwrap().is_none());
        assert!(!out.path().join("3").exists());
        assert!(db.folders().get(FolderId(12)).unwrap().is_some());
        assert_eq!(db.files().get(FileId(101)).unwrap().unwrap().size, 4);
        assert_eq!(
            db.module_items()
                .get((ModuleItemId(50), CourseId(1), ModuleId(5)))
                .unwrap()
                .unwrap()
                .content_id,
            Some(100)
        );

        // A second run finds everything up to date.
        let summary = sync(&canvas, Some(&db), &opt).await.unwrap();
        assert_eq!(summary.files_downloaded, 0);
        assert_eq!(summary.files_skipped, 2);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.courses_failed, 1);
        assert_eq!(summary.new_versions, 0);
        assert!(summary.to_string().starts_with("2 courses (1 failed), 3 folders (1 failed)"));

        // Unless asked to overwrite.
        let opt = Options {
            overwrite: true,
            ..opt
        };
        let summary = sync(&canvas, None, &opt).await.unwrap();
        assert_eq!(summary.files_downloaded, 2);
        assert_eq!(summary.modules, 0);
        assert_eq!(summary.new_versions, 0);
    }

    #[test]
    fn test_options_from_env() {
        #[derive(clap::Parser)]
        struct Cli {
            #[clap(flatten)]
            opt: Options,
        }

        std::env::set_var("CANVAS_DL_OVERWRITE", "1");
        std::env::set_var("CANVAS_DL_METADATA_ONLY", "no");
        let opt = <Cli as clap::Parser>::try_parse_from(["canvas-dl"]).unwrap().opt;
        std::env::remove_var("CANVAS_DL_OVERWRITE");
        std::env::remove_var("CANVAS_DL_METADATA_ONLY");
        assert!(opt.overwrite);
        assert!(!opt.metadata_only);
    }

    #[async_std::test]
    async fn test_metadata_only() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        mirror(src.path());
        let canvas = LocalClient::open(src.path().into());
        let db = Db::open_in_memory().unwrap();
        let opt = Options {
            out: out.path().into(),
            overwrite: false,
            metadata_only: true,
        };

        let summary = sync(&canvas, Some(&db), &opt).await.unwrap();
        assert_eq!(summary.files_downloaded, 0);
        assert_eq!(summary.new_versions, 10);
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
