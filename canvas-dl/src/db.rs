//! The SQLite database used to archive Canvas metadata.
//!
//! Every resource table is append-only with respect to changes: a resource which differs from the
//! last saved copy gets a new row with the next version number, and the previous row stops being
//! current. A resource which has not changed only has its `last_seen_on` timestamp updated. This
//! gives a complete history of how each course, folder, file and module evolved over time.

use crate::canvas::{
    Course, CourseId, File, FileId, Folder, FolderId, Module, ModuleId, ModuleItem, ModuleItemId,
    Raw, Resource,
};
use anyhow::{Context, Error};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::Args;
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Database options.
#[derive(Clone, Debug, Default, Args)]
#[group(id = "db_options")]
pub struct Options {
    /// Archive metadata about everything seen into the SQLite database at FILE.
    ///
    /// The database is created if it does not exist.
    #[clap(long = "db", env = "CANVAS_DL_DB", value_name = "FILE")]
    pub db_path: Option<PathBuf>,
}

impl Options {
    /// Open the database, if one was requested.
    pub fn open(&self) -> Result<Option<Db>, Error> {
        self.db_path.as_ref().map(Db::open).transpose()
    }
}

/// A connection to the database.
pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open the database at `path`, creating and setting it up if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let needs_setup = !path.exists();
        let conn = Connection::open(path)
            .with_context(|| format!("unable to open database {}", path.display()))?;
        let db = Self { conn };
        if needs_setup {
            tracing::info!("creating database {}", path.display());
            db.setup()?;
        }
        Ok(db)
    }

    /// Create a fresh, empty database in memory.
    pub fn open_in_memory() -> Result<Self, Error> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.setup()?;
        Ok(db)
    }

    /// Perform one-time setup of the database.
    fn setup(&self) -> Result<(), Error> {
        let tx = self.conn.unchecked_transaction()?;
        self.courses().create()?;
        self.folders().create()?;
        self.files().create()?;
        self.modules().create()?;
        self.module_items().create()?;
        tx.commit()?;
        Ok(())
    }

    pub fn courses(&self) -> Table<'_, Course, CourseId> {
        Table::new(&self.conn, "course")
    }

    pub fn folders(&self) -> Table<'_, Folder, FolderId> {
        Table::new(&self.conn, "folder")
    }

    pub fn files(&self) -> Table<'_, File, FileId> {
        Table::new(&self.conn, "file")
    }

    /// Modules, identified by module and course.
    pub fn modules(&self) -> Table<'_, Module, (ModuleId, CourseId)> {
        Table::new(&self.conn, "module")
    }

    /// Module items, identified by item, course and module.
    pub fn module_items(&self) -> Table<'_, ModuleItem, (ModuleItemId, CourseId, ModuleId)> {
        Table::new(&self.conn, "moduleitem")
    }
}

/// The columns identifying a resource in its table.
pub trait Key: Copy {
    /// Names of the identifying columns.
    const COLUMNS: &'static [&'static str];

    /// Values of the identifying columns, in the same order as [`COLUMNS`](Self::COLUMNS).
    fn values(&self) -> Vec<i64>;
}

impl Key for CourseId {
    const COLUMNS: &'static [&'static str] = &["id"];

    fn values(&self) -> Vec<i64> {
        vec![self.0]
    }
}

impl Key for FolderId {
    const COLUMNS: &'static [&'static str] = &["id"];

    fn values(&self) -> Vec<i64> {
        vec![self.0]
    }
}

impl Key for FileId {
    const COLUMNS: &'static [&'static str] = &["id"];

    fn values(&self) -> Vec<i64> {
        vec![self.0]
    }
}

impl Key for (ModuleId, CourseId) {
    const COLUMNS: &'static [&'static str] = &["id", "course_id"];

    fn values(&self) -> Vec<i64> {
        vec![self.0 .0, self.1 .0]
    }
}

impl Key for (ModuleItemId, CourseId, ModuleId) {
    const COLUMNS: &'static [&'static str] = &["id", "course_id", "module_id"];

    fn values(&self) -> Vec<i64> {
        vec![self.0 .0, self.1 .0, self.2 .0]
    }
}

/// Metadata about one saved version of a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Version {
    /// Starts at 0 for the first copy of a resource and increases by one with every change.
    pub version: i64,
    /// When this version was first seen.
    pub saved_on: DateTime<Utc>,
    /// When this version was most recently seen unchanged.
    pub last_seen_on: DateTime<Utc>,
    /// Whether this is the latest version.
    pub is_current: bool,
    pub data_hash: i64,
}

/// A table of versioned resources of type `T`, identified by `K`.
pub struct Table<'a, T, K> {
    conn: &'a Connection,
    name: &'static str,
    _phantom: PhantomData<fn(&T, &K)>,
}

impl<'a, T: Resource, K: Key> Table<'a, T, K> {
    fn new(conn: &'a Connection, name: &'static str) -> Self {
        Self {
            conn,
            name,
            _phantom: Default::default(),
        }
    }

    fn create(&self) -> Result<(), Error> {
        let columns = K::COLUMNS
            .iter()
            .map(|col| format!("{col} INTEGER NOT NULL"))
            .chain(
                [
                    // When this version was first saved.
                    "saved_on TEXT NOT NULL",
                    // When this version was most recently seen, unchanged.
                    "last_seen_on TEXT NOT NULL",
                    // The nth distinct copy of this resource we've saved.
                    "version INTEGER NOT NULL",
                    // 1 iff this is the most recent version of this resource.
                    "is_current INTEGER NOT NULL CHECK (is_current IN (0, 1))",
                    // The full JSON of the resource.
                    "data TEXT NOT NULL",
                    // Hash of the hash-normalized JSON, used for change detection.
                    "data_hash INTEGER NOT NULL",
                ]
                .map(String::from),
            )
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.execute(
            &format!("CREATE TABLE {} ({columns}) STRICT", self.name),
            [],
        )?;
        self.conn.execute(
            &format!(
                "CREATE UNIQUE INDEX idx_{name}_current ON {name} ({}) WHERE is_current = 1",
                K::COLUMNS.join(", "),
                name = self.name,
            ),
            [],
        )?;
        Ok(())
    }

    /// `WHERE` condition matching the key columns to parameters `?1` through `?n`.
    fn where_key(&self) -> String {
        K::COLUMNS
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{col} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn key_params(key: &K) -> Vec<SqlValue> {
        key.values().into_iter().map(SqlValue::Integer).collect()
    }

    /// Get the current version of a resource.
    pub fn get(&self, key: K) -> Result<Option<Raw<T>>, Error> {
        let data: Option<String> = self
            .conn
            .query_row(
                &format!(
                    "SELECT data FROM {} WHERE {} AND is_current = 1",
                    self.name,
                    self.where_key()
                ),
                params_from_iter(key.values()),
                |row| row.get(0),
            )
            .optional()?;
        data.map(|data| {
            serde_json::from_str(&data)
                .with_context(|| format!("malformed data in table {}", self.name))
        })
        .transpose()
    }

    /// Save a resource, seen now.
    ///
    /// See [`insert_at`](Self::insert_at).
    pub fn insert(&self, key: K, item: &Raw<T>, dry_run: bool) -> Result<(bool, i64), Error> {
        self.insert_at(key, item, Utc::now(), dry_run)
    }

    /// Save a resource which was observed at time `seen`.
    ///
    /// If the current saved version of the resource has the same hash, only its `last_seen_on` is
    /// updated (it never moves backwards). Otherwise a new version is saved and becomes current.
    ///
    /// # Returns
    ///
    /// Whether a new version was written, and the number of the now-current version.
    ///
    /// If `dry_run` is set, the return value is the same but the database is not modified.
    pub fn insert_at(
        &self,
        key: K,
        item: &Raw<T>,
        seen: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<(bool, i64), Error> {
        let n = K::COLUMNS.len();
        let seen = SqlValue::Text(timestamp(seen));
        let hash = data_hash(&item.hash_normalized())?;

        let tx = self.conn.unchecked_transaction()?;
        let current: Option<(i64, i64)> = tx
            .query_row(
                &format!(
                    "SELECT data_hash, version FROM {} WHERE {} AND is_current = 1",
                    self.name,
                    self.where_key()
                ),
                params_from_iter(key.values()),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let res = match current {
            Some((existing, version)) if existing == hash => {
                if !dry_run {
                    let mut params = Self::key_params(&key);
                    params.extend([seen, SqlValue::Integer(version)]);
                    tx.execute(
                        &format!(
                            "UPDATE {} SET last_seen_on = max(last_seen_on, ?{}) \
                             WHERE {} AND version = ?{}",
                            self.name,
                            n + 1,
                            self.where_key(),
                            n + 2
                        ),
                        params_from_iter(params),
                    )?;
                }
                (false, version)
            }
            current => {
                let version = current.map_or(0, |(_, version)| version + 1);
                if !dry_run {
                    if let Some((_, prev)) = current {
                        let mut params = Self::key_params(&key);
                        params.push(SqlValue::Integer(prev));
                        tx.execute(
                            &format!(
                                "UPDATE {} SET is_current = 0 WHERE {} AND version = ?{}",
                                self.name,
                                self.where_key(),
                                n + 1
                            ),
                            params_from_iter(params),
                        )?;
                    }
                    let mut params = Self::key_params(&key);
                    params.extend([
                        seen.clone(),
                        seen,
                        SqlValue::Integer(version),
                        SqlValue::Integer(1),
                        SqlValue::Text(serde_json::to_string(&canonicalize(item.raw()))?),
                        SqlValue::Integer(hash),
                    ]);
                    let placeholders = (1..=params.len())
                        .map(|i| format!("?{i}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    tx.execute(
                        &format!(
                            "INSERT INTO {} ({}, saved_on, last_seen_on, version, is_current, \
                             data, data_hash) VALUES ({placeholders})",
                            self.name,
                            K::COLUMNS.join(", "),
                        ),
                        params_from_iter(params),
                    )?;
                }
                (true, version)
            }
        };
        tx.commit()?;
        Ok(res)
    }

    /// All saved versions of a resource, oldest first.
    pub fn versions(&self, key: K) -> Result<Vec<Version>, Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT version, saved_on, last_seen_on, is_current, data_hash FROM {} \
             WHERE {} ORDER BY version",
            self.name,
            self.where_key()
        ))?;
        let rows = stmt
            .query_map(params_from_iter(key.values()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(version, saved_on, last_seen_on, is_current, data_hash)| {
                Ok(Version {
                    version,
                    saved_on: parse_timestamp(&saved_on)?,
                    last_seen_on: parse_timestamp(&last_seen_on)?,
                    is_current,
                    data_hash,
                })
            })
            .collect()
    }
}

/// Format a timestamp so that lexicographic order matches chronological order.
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, Error> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("malformed timestamp {s}"))?
        .with_timezone(&Utc))
}

/// Rebuild `value` with the keys of every object in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Hash JSON data for change detection.
///
/// This is the last 8 bytes of the SHA-256 digest of the canonical JSON encoding, read as a
/// big-endian signed integer (SQLite integers are signed 64-bit).
fn data_hash(data: &Value) -> Result<i64, Error> {
    let digest = Sha256::digest(serde_json::to_string(&canonicalize(data))?.as_bytes());
    let tail: [u8; 8] = digest[digest.len() - 8..].try_into()?;
    Ok(i64::from_be_bytes(tail))
}
