//! Record store for input directories and input files.
//!
//! The sync engine only ever sees a `FileStore` trait object. The store owns all
//! state; the engine re-reads what it needs before every decision and caches
//! nothing beyond one scan pass or one event.

mod memory;
mod sqlite;

use std::collections::BTreeMap;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::SyncError;
use crate::files::{FileUpdate, InputDirectory, InputFile};

pub trait FileStore: Send + Sync {
    fn get_files_by_directory(&self, input_dir_id: i64) -> Result<Vec<InputFile>, SyncError>;

    fn get_file_by_absolute_path(
        &self,
        absolute_path: &str,
    ) -> Result<Option<InputFile>, SyncError>;

    /// Inserts the file, or on an absolute path conflict overwrites its content
    /// hash, timestamps, status and work flags.
    fn insert_file(&self, file: &InputFile) -> Result<(), SyncError>;

    fn update_file(&self, id: &str, changes: &FileUpdate) -> Result<(), SyncError>;

    fn update_file_by_absolute_path(
        &self,
        absolute_path: &str,
        changes: &FileUpdate,
    ) -> Result<(), SyncError>;

    fn get_all_files(&self) -> Result<Vec<InputFile>, SyncError>;

    fn get_directories(&self) -> Result<Vec<InputDirectory>, SyncError>;

    /// Registers a directory. Registering a path twice returns the existing row.
    fn add_directory(&self, path: &str) -> Result<InputDirectory, SyncError>;

    fn get_meta(&self) -> Result<BTreeMap<String, String>, SyncError>;

    fn set_meta(&self, entries: &[(String, String)]) -> Result<(), SyncError>;
}

fn check_update_result(rows_updated: usize, key: &str) -> Result<(), SyncError> {
    if rows_updated != 1 {
        return Err(SyncError::Error(format!(
            "Expected to update 1 file for '{key}', updated {rows_updated}"
        )));
    }
    Ok(())
}
