//! File state transitions shared by the scanner and the watcher.
//!
//! Every decision about a single path goes through [`plan`]: given what was
//! observed on disk and the record currently persisted for that path, it
//! returns the one write (if any) that brings the record in line.
//!
//! | observation        | record            | result                       |
//! |--------------------|-------------------|------------------------------|
//! | any, readable      | none              | insert `new`                 |
//! | any, unreadable    | none              | nothing                      |
//! | scanned/changed, unreadable | not missing | `missing`                  |
//! | added, unreadable  | any               | nothing (event dropped)      |
//! | readable           | missing, same hash| `found`                      |
//! | readable           | missing, new hash | `updated`                    |
//! | scanned/changed    | present, new hash | `updated`                    |
//! | scanned/changed    | present, same hash| nothing                      |
//! | added              | present           | `updated`                    |
//! | removed            | not missing       | `missing`                    |

use std::path::Path;

use log::{debug, Level};
use logging_timer::timer;

use crate::error::SyncError;
use crate::files::{FileStatus, FileUpdate, InputDirectory, InputFile};
use crate::store::FileStore;

/// What was seen for one path. Hashes are `None` when the file couldn't be read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    /// Visited by a full directory walk.
    Scanned(Option<String>),
    Added(Option<String>),
    Changed(Option<String>),
    /// Deleted, or not visited by a walk that should have seen it.
    Removed,
}

impl Observation {
    fn content_hash(&self) -> Option<&str> {
        match self {
            Observation::Scanned(h) | Observation::Added(h) | Observation::Changed(h) => {
                h.as_deref()
            }
            Observation::Removed => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Insert(String),
    Update(FileUpdate),
    Nothing,
}

/// Result of reconciling one path, as reported to scan summaries and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Transitioned(FileStatus),
    Unchanged,
}

/// Decides the write needed for one path. Pure; `now` stamps `date_modified`.
pub fn plan(observation: &Observation, existing: Option<&InputFile>, now: i64) -> Action {
    let Some(existing) = existing else {
        return match observation.content_hash() {
            Some(hash) => Action::Insert(hash.to_owned()),
            None => Action::Nothing,
        };
    };

    let hash = match (observation, observation.content_hash()) {
        (Observation::Removed, _) => None,
        (Observation::Added(_), None) => return Action::Nothing,
        (_, hash) => hash,
    };

    let Some(hash) = hash else {
        return if existing.is_missing() {
            Action::Nothing
        } else {
            Action::Update(FileUpdate::missing(now))
        };
    };

    if existing.is_missing() {
        return if existing.known_hash() == Some(hash) {
            Action::Update(FileUpdate::found(hash.to_owned(), now))
        } else {
            Action::Update(FileUpdate::content_changed(hash.to_owned(), now))
        };
    }

    match observation {
        Observation::Added(_) => Action::Update(FileUpdate::content_changed(hash.to_owned(), now)),
        _ if existing.content_hash.as_deref() != Some(hash) => {
            Action::Update(FileUpdate::content_changed(hash.to_owned(), now))
        }
        _ => Action::Nothing,
    }
}

/// How updates address the record: the scanner works from a snapshot and knows
/// identities, the watcher only knows paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKey {
    Id,
    AbsolutePath,
}

/// Applies [`plan`] results to a store for one input directory.
pub struct Reconciler<'a> {
    store: &'a dyn FileStore,
    directory: &'a InputDirectory,
    key: RecordKey,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn FileStore, directory: &'a InputDirectory, key: RecordKey) -> Self {
        Reconciler {
            store,
            directory,
            key,
        }
    }

    pub fn apply(
        &self,
        path: &Path,
        observation: &Observation,
        existing: Option<&InputFile>,
    ) -> Result<Outcome, SyncError> {
        let _tmr = timer!(Level::Trace; "Reconciler.apply", "{}", path.display());

        let now = chrono::Utc::now().timestamp();

        match plan(observation, existing, now) {
            Action::Nothing => Ok(Outcome::Unchanged),
            Action::Insert(hash) => {
                let file =
                    InputFile::new_observed(self.directory.id, self.directory.root(), path, hash, now);
                debug!("New file: {}", path.display());
                self.store.insert_file(&file)?;
                Ok(Outcome::Inserted)
            }
            Action::Update(changes) => {
                // Update plans are only produced for existing records
                let status = changes.status.unwrap_or(FileStatus::Updated);
                debug!("File {}: {}", status, path.display());

                match (self.key, existing) {
                    (RecordKey::Id, Some(existing)) => {
                        self.store.update_file(&existing.id, &changes)?
                    }
                    _ => self
                        .store
                        .update_file_by_absolute_path(&path.to_string_lossy(), &changes)?,
                }
                Ok(Outcome::Transitioned(status))
            }
        }
    }
}
