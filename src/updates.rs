use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use log::{info, warn};
use serde::Serialize;

use crate::error::SyncError;
use crate::files::{FileStatus, InputDirectory, InputFile};
use crate::store::FileStore;

/// Everything a UI needs to redraw after the engine settles a batch of writes.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProjectSnapshot {
    pub directories: Vec<InputDirectory>,
    pub files: Vec<InputFile>,
    pub meta: BTreeMap<String, String>,
}

impl ProjectSnapshot {
    pub fn load(store: &dyn FileStore) -> Result<Self, SyncError> {
        Ok(ProjectSnapshot {
            directories: store.get_directories()?,
            files: store.get_all_files()?,
            meta: store.get_meta()?,
        })
    }

    pub fn count_by_status(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }
}

/// Receives a fresh snapshot after a scan finishes or a watcher event changes a record.
///
/// Delivery is fire-and-forget: the write has already happened, and nothing a
/// sink does can undo or delay it.
pub trait UpdateSink: Send + Sync {
    fn on_update(&self, snapshot: &ProjectSnapshot);
}

impl<F> UpdateSink for F
where
    F: Fn(&ProjectSnapshot) + Send + Sync,
{
    fn on_update(&self, snapshot: &ProjectSnapshot) {
        self(snapshot)
    }
}

/// Logs a one-line status breakdown per update.
pub struct LogSink;

impl UpdateSink for LogSink {
    fn on_update(&self, snapshot: &ProjectSnapshot) {
        info!(
            "Files: {} total - new: {}, updated: {}, found: {}, missing: {}",
            snapshot.files.len(),
            snapshot.count_by_status(FileStatus::New),
            snapshot.count_by_status(FileStatus::Updated),
            snapshot.count_by_status(FileStatus::Found),
            snapshot.count_by_status(FileStatus::Missing),
        );
    }
}

pub(crate) fn notify_sink(store: &dyn FileStore, sink: Option<&dyn UpdateSink>) {
    let Some(sink) = sink else {
        return;
    };

    let snapshot = match ProjectSnapshot::load(store) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Skipping update notification, snapshot failed to load: {}", e);
            return;
        }
    };

    // Sink panics stay on this side of the call
    if panic::catch_unwind(AssertUnwindSafe(|| sink.on_update(&snapshot))).is_err() {
        warn!("Update sink panicked; notification dropped");
    }
}
