use std::path::Path;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::hash::Hash;

/// Sync status of a tracked file. Files cycle between these as the disk changes;
/// there is no terminal state.
#[derive(
    AsRefStr,
    EnumIter,
    EnumString,
    Display,
    Debug,
    PartialEq,
    Eq,
    Copy,
    Clone,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    New,
    Updated,
    Found,
    Missing,
}

impl ToSql for FileStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_ref()))
    }
}

impl FromSql for FileStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDirectory {
    pub id: i64,
    pub path: String,
    pub date_added: i64,
}

impl InputDirectory {
    pub fn root(&self) -> &Path {
        Path::new(&self.path)
    }
}

/// One tracked file. `id` is always `Hash::identity_of(absolute_path)`, and a
/// `None` content hash implies `FileStatus::Missing`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    pub id: String,
    pub input_dir_id: i64,
    pub absolute_path: String,
    pub relative_path: String,
    pub content_hash: Option<String>,
    /// Most recent non-null content hash. Survives a trip through `missing`.
    pub last_known_hash: Option<String>,
    pub date_added: i64,
    pub date_modified: Option<i64>,
    pub status: FileStatus,
    pub processed: bool,
    pub completed_manually: bool,
}

impl InputFile {
    /// A first sighting: status `new`, nothing processed yet.
    pub fn new_observed(
        input_dir_id: i64,
        root: &Path,
        absolute_path: &Path,
        content_hash: String,
        now: i64,
    ) -> Self {
        let relative_path = absolute_path
            .strip_prefix(root)
            .unwrap_or(absolute_path)
            .to_string_lossy()
            .into_owned();

        InputFile {
            id: Hash::identity_of(absolute_path),
            input_dir_id,
            absolute_path: absolute_path.to_string_lossy().into_owned(),
            relative_path,
            content_hash: Some(content_hash.clone()),
            last_known_hash: Some(content_hash),
            date_added: now,
            date_modified: Some(now),
            status: FileStatus::New,
            processed: false,
            completed_manually: false,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.status == FileStatus::Missing
    }

    /// The hash the file had when it was last readable.
    pub fn known_hash(&self) -> Option<&str> {
        self.content_hash
            .as_deref()
            .or(self.last_known_hash.as_deref())
    }

    pub fn apply(&mut self, changes: &FileUpdate) {
        if let Some(status) = changes.status {
            self.status = status;
        }
        if let Some(ref content_hash) = changes.content_hash {
            self.content_hash = content_hash.clone();
        }
        if let Some(ref last_known_hash) = changes.last_known_hash {
            self.last_known_hash = Some(last_known_hash.clone());
        }
        if let Some(date_modified) = changes.date_modified {
            self.date_modified = Some(date_modified);
        }
        if let Some(processed) = changes.processed {
            self.processed = processed;
        }
        if let Some(completed_manually) = changes.completed_manually {
            self.completed_manually = completed_manually;
        }
    }
}

/// Partial update of an `InputFile`. `None` fields are left untouched;
/// `content_hash: Some(None)` clears the hash.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileUpdate {
    pub status: Option<FileStatus>,
    pub content_hash: Option<Option<String>>,
    pub last_known_hash: Option<String>,
    pub date_modified: Option<i64>,
    pub processed: Option<bool>,
    pub completed_manually: Option<bool>,
}

impl FileUpdate {
    pub fn missing(now: i64) -> Self {
        FileUpdate {
            status: Some(FileStatus::Missing),
            content_hash: Some(None),
            date_modified: Some(now),
            ..Default::default()
        }
    }

    /// New bytes: any prior processing or manual completion no longer applies.
    pub fn content_changed(content_hash: String, now: i64) -> Self {
        FileUpdate {
            status: Some(FileStatus::Updated),
            content_hash: Some(Some(content_hash.clone())),
            last_known_hash: Some(content_hash),
            date_modified: Some(now),
            processed: Some(false),
            completed_manually: Some(false),
        }
    }

    pub fn found(content_hash: String, now: i64) -> Self {
        FileUpdate {
            status: Some(FileStatus::Found),
            content_hash: Some(Some(content_hash.clone())),
            last_known_hash: Some(content_hash),
            date_modified: Some(now),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == FileUpdate::default()
    }
}
