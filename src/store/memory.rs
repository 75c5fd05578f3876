use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::{check_update_result, FileStore};
use crate::error::SyncError;
use crate::files::{FileUpdate, InputDirectory, InputFile};

#[derive(Default)]
struct MemoryState {
    directories: Vec<InputDirectory>,
    files: BTreeMap<String, InputFile>, // keyed by absolute path
    meta: BTreeMap<String, String>,
}

/// In-process store with the same semantics as `SqliteStore`.
///
/// Counts successful writes, and can be told to reject every write so callers
/// can exercise their persistence-failure handling.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    writes: AtomicU64,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of file inserts and non-empty file updates applied so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, SyncError> {
        self.state
            .lock()
            .map_err(|_| SyncError::Error("Memory store lock poisoned".into()))
    }

    fn check_writable(&self) -> Result<(), SyncError> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(SyncError::Error("Memory store is rejecting writes".into()));
        }
        Ok(())
    }

    fn check_invariants(file: &InputFile) -> Result<(), SyncError> {
        if file.content_hash.is_none() && !file.is_missing() {
            return Err(SyncError::Error(format!(
                "File '{}' has no content hash but is not missing",
                file.absolute_path
            )));
        }
        Ok(())
    }

    fn apply_update<F>(&self, matches: F, key: &str, changes: &FileUpdate) -> Result<(), SyncError>
    where
        F: Fn(&InputFile) -> bool,
    {
        if changes.is_empty() {
            return Ok(());
        }
        self.check_writable()?;

        let mut state = self.state()?;
        let mut rows_updated = 0;
        for file in state.files.values_mut().filter(|f| matches(f)) {
            let mut updated = file.clone();
            updated.apply(changes);
            MemoryStore::check_invariants(&updated)?;
            *file = updated;
            rows_updated += 1;
        }
        check_update_result(rows_updated, key)?;

        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

impl FileStore for MemoryStore {
    fn get_files_by_directory(&self, input_dir_id: i64) -> Result<Vec<InputFile>, SyncError> {
        Ok(self
            .state()?
            .files
            .values()
            .filter(|f| f.input_dir_id == input_dir_id)
            .cloned()
            .collect())
    }

    fn get_file_by_absolute_path(
        &self,
        absolute_path: &str,
    ) -> Result<Option<InputFile>, SyncError> {
        Ok(self.state()?.files.get(absolute_path).cloned())
    }

    fn insert_file(&self, file: &InputFile) -> Result<(), SyncError> {
        self.check_writable()?;
        MemoryStore::check_invariants(file)?;

        let mut state = self.state()?;
        if !state.directories.iter().any(|d| d.id == file.input_dir_id) {
            return Err(SyncError::Error(format!(
                "Input directory {} does not exist",
                file.input_dir_id
            )));
        }

        match state.files.get_mut(&file.absolute_path) {
            Some(existing) => {
                existing.content_hash = file.content_hash.clone();
                existing.last_known_hash = file.last_known_hash.clone();
                existing.date_modified = file.date_modified;
                existing.status = file.status;
                existing.processed = file.processed;
                existing.completed_manually = file.completed_manually;
            }
            None => {
                state.files.insert(file.absolute_path.clone(), file.clone());
            }
        }

        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn update_file(&self, id: &str, changes: &FileUpdate) -> Result<(), SyncError> {
        self.apply_update(|f| f.id == id, id, changes)
    }

    fn update_file_by_absolute_path(
        &self,
        absolute_path: &str,
        changes: &FileUpdate,
    ) -> Result<(), SyncError> {
        self.apply_update(|f| f.absolute_path == absolute_path, absolute_path, changes)
    }

    fn get_all_files(&self) -> Result<Vec<InputFile>, SyncError> {
        Ok(self.state()?.files.values().cloned().collect())
    }

    fn get_directories(&self) -> Result<Vec<InputDirectory>, SyncError> {
        Ok(self.state()?.directories.clone())
    }

    fn add_directory(&self, path: &str) -> Result<InputDirectory, SyncError> {
        let mut state = self.state()?;
        if let Some(existing) = state.directories.iter().find(|d| d.path == path) {
            return Ok(existing.clone());
        }

        let directory = InputDirectory {
            id: state.directories.iter().map(|d| d.id).max().unwrap_or(0) + 1,
            path: path.to_owned(),
            date_added: Utc::now().timestamp(),
        };
        state.directories.push(directory.clone());
        Ok(directory)
    }

    fn get_meta(&self) -> Result<BTreeMap<String, String>, SyncError> {
        Ok(self.state()?.meta.clone())
    }

    fn set_meta(&self, entries: &[(String, String)]) -> Result<(), SyncError> {
        let mut state = self.state()?;
        for (key, value) in entries {
            state.meta.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FileStatus;
    use std::path::Path;

    fn sample(dir: &InputDirectory, name: &str) -> InputFile {
        InputFile::new_observed(dir.id, dir.root(), &dir.root().join(name), "h1".into(), 10)
    }

    #[test]
    fn test_counts_writes() {
        let store = MemoryStore::new();
        let dir = store.add_directory("/data").unwrap();
        let file = sample(&dir, "a.png");

        store.insert_file(&file).unwrap();
        store.update_file(&file.id, &FileUpdate::missing(20)).unwrap();
        store.update_file(&file.id, &FileUpdate::default()).unwrap();

        assert_eq!(store.write_count(), 2);
        assert_eq!(
            store.get_file_by_absolute_path(&file.absolute_path).unwrap().unwrap().status,
            FileStatus::Missing
        );
    }

    #[test]
    fn test_rejects_writes_when_failing() {
        let store = MemoryStore::new();
        let dir = store.add_directory("/data").unwrap();
        store.set_fail_writes(true);

        assert!(store.insert_file(&sample(&dir, "a.png")).is_err());
        assert_eq!(store.write_count(), 0);

        store.set_fail_writes(false);
        assert!(store.insert_file(&sample(&dir, "a.png")).is_ok());
    }

    #[test]
    fn test_enforces_hash_invariant() {
        let store = MemoryStore::new();
        let dir = store.add_directory("/data").unwrap();
        let file = sample(&dir, "a.png");
        store.insert_file(&file).unwrap();

        let bad = FileUpdate {
            content_hash: Some(None),
            ..Default::default()
        };
        assert!(store.update_file(&file.id, &bad).is_err());
        assert!(store
            .get_file_by_absolute_path(&file.absolute_path)
            .unwrap()
            .unwrap()
            .content_hash
            .is_some());
    }

    #[test]
    fn test_requires_directory() {
        let store = MemoryStore::new();
        let orphan = InputFile::new_observed(7, Path::new("/x"), Path::new("/x/a.png"), "h".into(), 1);
        assert!(store.insert_file(&orphan).is_err());
    }

    #[test]
    fn test_directories_are_unique_by_path() {
        let store = MemoryStore::new();
        let a = store.add_directory("/a").unwrap();
        let again = store.add_directory("/a").unwrap();
        let b = store.add_directory("/b").unwrap();
        assert_eq!(a, again);
        assert_eq!(b.id, a.id + 1);
    }
}
