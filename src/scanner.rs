// Scan phases
// 1. Snapshot: load every persisted file for the input directory, keyed by absolute path.
// 2. Walk: recurse from the root. Symlinks are skipped (unless the config follows them),
//    unsupported extensions are skipped, directories are always descended.
//      - For each supported file: hash it and reconcile against the snapshot entry.
//        Writes happen as each file is reconciled; each one is a complete transition.
// 3. Sweep: every snapshot entry the walk never visited and that isn't already
//    missing becomes missing. Entries whose extension is no longer supported are
//    left alone; the walk never looks at those files.
//
// An unreadable root fails the scan before anything is written. An unreadable
// subdirectory is logged and skipped; its files are then picked up by the sweep.

use std::collections::{HashMap, HashSet};
use std::fs::{self, ReadDir};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info, trace, warn, Level};
use logging_timer::timer;
use serde::Serialize;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::files::{FileStatus, InputDirectory, InputFile};
use crate::hash::Hash;
use crate::reconcile::{Observation, Outcome, Reconciler, RecordKey};
use crate::store::FileStore;

/// Per-scan tallies.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub new_count: u64,
    pub updated_count: u64,
    pub found_count: u64,
    pub missing_count: u64,
    pub unchanged_count: u64,
    /// New files that could not be read and were not recorded
    pub skipped_count: u64,
    /// Files whose write was rejected by the store
    pub failed_count: u64,
    pub files_scanned: u64,
    pub directories_scanned: u64,
}

impl ScanSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Inserted => self.new_count += 1,
            Outcome::Transitioned(FileStatus::New) => self.new_count += 1,
            Outcome::Transitioned(FileStatus::Updated) => self.updated_count += 1,
            Outcome::Transitioned(FileStatus::Found) => self.found_count += 1,
            Outcome::Transitioned(FileStatus::Missing) => self.missing_count += 1,
            Outcome::Unchanged => self.unchanged_count += 1,
        }
    }

    pub fn change_count(&self) -> u64 {
        self.new_count + self.updated_count + self.found_count + self.missing_count
    }
}

/// Context passed through recursive directory scanning to avoid large parameter lists
struct ScanContext<'a> {
    reconciler: Reconciler<'a>,
    config: &'a SyncConfig,
    snapshot: HashMap<String, InputFile>,
    seen: HashSet<String>,
    visited_dirs: HashSet<PathBuf>,
    interrupt_token: &'a AtomicBool,
    summary: ScanSummary,
}

pub struct DirectoryScanner {}

impl DirectoryScanner {
    /// Reconciles the persisted files of `directory` with what is on disk.
    ///
    /// `interrupt_token` is checked between files; when set the scan stops with
    /// `SyncError::ScanInterrupted`, leaving every write made so far intact.
    pub fn scan(
        directory: &InputDirectory,
        store: &dyn FileStore,
        config: &SyncConfig,
        interrupt_token: &AtomicBool,
    ) -> Result<ScanSummary, SyncError> {
        let _tmr = timer!(Level::Debug; "DirectoryScanner::scan", "{}", directory.path);
        let root = directory.root();
        info!("Scanning directory: {} (input dir {})", root.display(), directory.id);

        let snapshot: HashMap<String, InputFile> = store
            .get_files_by_directory(directory.id)?
            .into_iter()
            .map(|file| (file.absolute_path.clone(), file))
            .collect();

        let mut ctx = ScanContext {
            reconciler: Reconciler::new(store, directory, RecordKey::Id),
            config,
            snapshot,
            seen: HashSet::new(),
            visited_dirs: HashSet::new(),
            interrupt_token,
            summary: ScanSummary::default(),
        };

        let entries = fs::read_dir(root).map_err(|source| SyncError::RootUnreadable {
            path: root.to_path_buf(),
            source,
        })?;
        if config.follow_symlinks {
            ctx.visited_dirs.insert(dunce::canonicalize(root)?);
        }

        DirectoryScanner::scan_entries(&mut ctx, root, entries)?;
        DirectoryScanner::sweep(&mut ctx)?;

        let summary = ctx.summary;
        info!(
            "Scan completed for: {} - new: {}, updated: {}, found: {}, missing: {}, unchanged: {}, skipped: {}, failed: {}",
            root.display(),
            summary.new_count,
            summary.updated_count,
            summary.found_count,
            summary.missing_count,
            summary.unchanged_count,
            summary.skipped_count,
            summary.failed_count
        );

        Ok(summary)
    }

    fn scan_directory_recursive(ctx: &mut ScanContext, path: &Path) -> Result<(), SyncError> {
        if ctx.config.follow_symlinks {
            // Symlinked directories can lead back into the tree
            match dunce::canonicalize(path) {
                Ok(canonical) => {
                    if !ctx.visited_dirs.insert(canonical) {
                        trace!("Already visited, skipping: '{}'", path.display());
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!("Cannot resolve directory '{}': {}", path.display(), e);
                    return Ok(());
                }
            }
        }

        match fs::read_dir(path) {
            Ok(entries) => DirectoryScanner::scan_entries(ctx, path, entries),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Directory disappeared during scan
                trace!("Directory disappeared during scan: '{}'", path.display());
                Ok(())
            }
            Err(e) => {
                error!(
                    "Cannot read directory contents for '{}': {} (kind: {:?})",
                    path.display(),
                    e,
                    e.kind()
                );
                Ok(())
            }
        }
    }

    fn scan_entries(ctx: &mut ScanContext, path: &Path, entries: ReadDir) -> Result<(), SyncError> {
        let _tmr = timer!(Level::Trace; "scan_entries", "{}", path.display());

        ctx.summary.directories_scanned += 1;

        for entry in entries {
            DirectoryScanner::check_interrupted(ctx.interrupt_token)?;

            // Handle errors during directory iteration
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    error!(
                        "Error reading directory entry in '{}': {}",
                        path.display(),
                        e
                    );
                    continue;
                }
            };
            let entry_path = entry.path();

            // DirEntry::file_type does not follow symlinks
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    warn!("Cannot read file type of '{}': {}", entry_path.display(), e);
                    continue;
                }
            };

            let (is_dir, is_file) = if file_type.is_symlink() {
                if !ctx.config.follow_symlinks {
                    trace!("Ignoring symlink: '{}'", entry_path.display());
                    continue;
                }
                match fs::metadata(&entry_path) {
                    Ok(target) => (target.is_dir(), target.is_file()),
                    Err(e) => {
                        trace!("Ignoring broken symlink '{}': {}", entry_path.display(), e);
                        continue;
                    }
                }
            } else {
                (file_type.is_dir(), file_type.is_file())
            };

            if is_dir {
                DirectoryScanner::scan_directory_recursive(ctx, &entry_path)?;
            } else if is_file && ctx.config.is_supported(&entry_path) {
                DirectoryScanner::handle_file(ctx, &entry_path);
            } else {
                trace!("Not tracked: '{}'", entry_path.display());
            }
        }

        Ok(())
    }

    fn handle_file(ctx: &mut ScanContext, path: &Path) {
        let path_str = path.to_string_lossy().into_owned();
        ctx.summary.files_scanned += 1;

        let content_hash = Hash::content_hash_of(path);
        let existing = ctx.snapshot.get(&path_str);
        ctx.seen.insert(path_str);

        if existing.is_none() && content_hash.is_none() {
            warn!("New file detected but unreadable, not recorded: {}", path.display());
            ctx.summary.skipped_count += 1;
            return;
        }

        match ctx
            .reconciler
            .apply(path, &Observation::Scanned(content_hash), existing)
        {
            Ok(outcome) => ctx.summary.record(outcome),
            Err(e) => {
                // Best effort: files are independent, so carry on with the next one
                error!("Failed to record '{}': {}", path.display(), e);
                ctx.summary.failed_count += 1;
            }
        }
    }

    fn sweep(ctx: &mut ScanContext) -> Result<(), SyncError> {
        let _tmr = timer!(Level::Trace; "sweep", "{}", ctx.snapshot.len());

        for (path_str, record) in &ctx.snapshot {
            if ctx.seen.contains(path_str) || record.is_missing() {
                continue;
            }
            let path = Path::new(path_str);
            if !ctx.config.is_supported(path) {
                trace!("Extension no longer supported, not sweeping: '{}'", path.display());
                continue;
            }
            DirectoryScanner::check_interrupted(ctx.interrupt_token)?;

            match ctx.reconciler.apply(path, &Observation::Removed, Some(record)) {
                Ok(outcome) => ctx.summary.record(outcome),
                Err(e) => {
                    error!("Failed to mark '{}' missing: {}", path.display(), e);
                    ctx.summary.failed_count += 1;
                }
            }
        }

        Ok(())
    }

    fn check_interrupted(interrupt_token: &AtomicBool) -> Result<(), SyncError> {
        if interrupt_token.load(Ordering::Acquire) {
            return Err(SyncError::ScanInterrupted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SqliteStore};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        store: MemoryStore,
        directory: InputDirectory,
        config: SyncConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let root = dunce::canonicalize(tmp.path()).unwrap();
            let store = MemoryStore::new();
            let directory = store.add_directory(&root.to_string_lossy()).unwrap();
            Fixture {
                tmp,
                store,
                directory,
                config: SyncConfig::default(),
            }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.directory.root().join(rel)
        }

        fn write(&self, rel: &str, bytes: &[u8]) {
            let path = self.path(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, bytes).unwrap();
        }

        fn scan(&self) -> ScanSummary {
            DirectoryScanner::scan(&self.directory, &self.store, &self.config, &AtomicBool::new(false))
                .unwrap()
        }

        fn file(&self, rel: &str) -> InputFile {
            self.store
                .get_file_by_absolute_path(&self.path(rel).to_string_lossy())
                .unwrap()
                .unwrap()
        }
    }

    #[test]
    fn test_first_scan_then_idempotent_rescan() {
        let fx = Fixture::new();
        fx.write("a.png", b"X");

        let first = fx.scan();
        assert_eq!(first.new_count, 1);

        let file = fx.file("a.png");
        assert_eq!(file.status, FileStatus::New);
        assert_eq!(file.content_hash, Hash::content_hash_of(&fx.path("a.png")));
        assert_eq!(file.relative_path, "a.png");

        let writes = fx.store.write_count();
        let second = fx.scan();
        assert_eq!(second.change_count(), 0);
        assert_eq!(second.unchanged_count, 1);
        assert_eq!(fx.store.write_count(), writes);
    }

    #[test]
    fn test_edit_then_delete_then_restore() {
        let fx = Fixture::new();
        fx.write("a.png", b"X");
        fx.scan();

        let mut file = fx.file("a.png");
        file.processed = true;
        file.completed_manually = true;
        fx.store.insert_file(&file).unwrap();

        // B: edit
        fx.write("a.png", b"Y");
        let summary = fx.scan();
        assert_eq!(summary.updated_count, 1);
        let file = fx.file("a.png");
        let hash_y = Hash::content_hash_of(&fx.path("a.png"));
        assert_eq!(file.status, FileStatus::Updated);
        assert_eq!(file.content_hash, hash_y);
        assert!(!file.processed);
        assert!(!file.completed_manually);

        // C: delete
        fs::remove_file(fx.path("a.png")).unwrap();
        let summary = fx.scan();
        assert_eq!(summary.missing_count, 1);
        let file = fx.file("a.png");
        assert_eq!(file.status, FileStatus::Missing);
        assert_eq!(file.content_hash, None);

        // Still gone: nothing more to do
        assert_eq!(fx.scan().change_count(), 0);

        // Restore with the same bytes
        fx.write("a.png", b"Y");
        let summary = fx.scan();
        assert_eq!(summary.found_count, 1);
        let file = fx.file("a.png");
        assert_eq!(file.status, FileStatus::Found);
        assert_eq!(file.content_hash, hash_y);
    }

    #[test]
    fn test_restore_with_different_bytes_is_updated() {
        let fx = Fixture::new();
        fx.write("a.png", b"X");
        fx.scan();
        fs::remove_file(fx.path("a.png")).unwrap();
        fx.scan();

        fx.write("a.png", b"Z");
        assert_eq!(fx.scan().updated_count, 1);
        assert_eq!(fx.file("a.png").status, FileStatus::Updated);
    }

    #[test]
    fn test_nested_directories_and_relative_paths() {
        let fx = Fixture::new();
        fx.write("set1/a.jpg", b"1");
        fx.write("set1/deeper/b.JPEG", b"2");
        fx.write("c.webp", b"3");

        let summary = fx.scan();
        assert_eq!(summary.new_count, 3);
        assert_eq!(summary.directories_scanned, 3);

        let nested = fx.file("set1/deeper/b.JPEG");
        assert_eq!(
            nested.relative_path,
            Path::new("set1").join("deeper").join("b.JPEG").to_string_lossy()
        );
        assert_eq!(nested.id, Hash::identity_of(&fx.path("set1/deeper/b.JPEG")));
    }

    #[test]
    fn test_unsupported_extensions_are_invisible() {
        let fx = Fixture::new();
        fx.write("notes.txt", b"text");
        fx.write("raw.cr2", b"raw");
        fx.write("noext", b"?");

        let summary = fx.scan();
        assert_eq!(summary.files_scanned, 0);
        assert!(fx.store.get_all_files().unwrap().is_empty());

        fs::remove_file(fx.path("notes.txt")).unwrap();
        fx.scan();
        assert_eq!(fx.store.write_count(), 0);
    }

    #[test]
    fn test_removed_subdirectory_is_swept() {
        let fx = Fixture::new();
        fx.write("keep.png", b"k");
        fx.write("sub/a.png", b"a");
        fx.write("sub/b.png", b"b");
        fx.scan();

        fs::remove_dir_all(fx.path("sub")).unwrap();
        let summary = fx.scan();
        assert_eq!(summary.missing_count, 2);
        assert_eq!(summary.unchanged_count, 1);
        assert_eq!(fx.file("sub/a.png").status, FileStatus::Missing);
        assert_eq!(fx.file("keep.png").status, FileStatus::New);
    }

    #[test]
    fn test_dropped_extension_is_not_swept() {
        let mut fx = Fixture::new();
        fx.config.extensions.push("tif".into());
        fx.write("a.tif", b"t");
        fx.write("b.png", b"p");
        assert_eq!(fx.scan().new_count, 2);

        fx.config = SyncConfig::default();
        let writes = fx.store.write_count();
        let summary = fx.scan();
        assert_eq!(summary.missing_count, 0);
        assert_eq!(summary.unchanged_count, 1);
        assert_eq!(fx.store.write_count(), writes);
        assert_eq!(fx.file("a.tif").status, FileStatus::New);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_is_skipped_and_swept() {
        use std::os::unix::fs::PermissionsExt;

        let fx = Fixture::new();
        fx.write("keep.png", b"k");
        fx.write("locked/a.png", b"a");
        fx.scan();

        let locked = fx.path("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // Running as root: permissions are not enforced
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let summary = fx.scan();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(summary.missing_count, 1);
        assert_eq!(summary.unchanged_count, 1);
        assert_eq!(fx.file("locked/a.png").status, FileStatus::Missing);
        assert_eq!(fx.file("keep.png").status, FileStatus::New);
    }

    #[test]
    fn test_unreadable_root_fails_without_writes() {
        let store = MemoryStore::new();
        let directory = store.add_directory("/definitely/not/here/imgsync").unwrap();

        let result = DirectoryScanner::scan(
            &directory,
            &store,
            &SyncConfig::default(),
            &AtomicBool::new(false),
        );
        assert!(matches!(result, Err(SyncError::RootUnreadable { .. })));
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_interrupted_scan() {
        let fx = Fixture::new();
        fx.write("a.png", b"a");

        let result = DirectoryScanner::scan(&fx.directory, &fx.store, &fx.config, &AtomicBool::new(true));
        assert!(matches!(result, Err(SyncError::ScanInterrupted)));
        assert_eq!(fx.store.write_count(), 0);
    }

    #[test]
    fn test_write_failures_do_not_stop_the_scan() {
        let fx = Fixture::new();
        fx.write("a.png", b"a");
        fx.write("b.png", b"b");

        fx.store.set_fail_writes(true);
        let summary = fx.scan();
        assert_eq!(summary.failed_count, 2);
        assert_eq!(summary.files_scanned, 2);

        fx.store.set_fail_writes(false);
        assert_eq!(fx.scan().new_count, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_never_recorded() {
        use std::os::unix::fs::symlink;

        let fx = Fixture::new();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("target.png"), b"t").unwrap();
        fs::create_dir(outside.path().join("linked")).unwrap();
        fs::write(outside.path().join("linked/inner.png"), b"i").unwrap();

        symlink(outside.path().join("target.png"), fx.path("link.png")).unwrap();
        symlink(outside.path().join("linked"), fx.path("linkdir")).unwrap();
        symlink(fx.tmp.path(), fx.path("loop")).unwrap();

        let summary = fx.scan();
        assert_eq!(summary.files_scanned, 0);
        assert!(fx.store.get_all_files().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_followed_symlinks_do_not_loop() {
        use std::os::unix::fs::symlink;

        let mut fx = Fixture::new();
        fx.config.follow_symlinks = true;
        fx.write("real/a.png", b"a");
        symlink(fx.path("real"), fx.path("alias")).unwrap();
        symlink(fx.directory.root(), fx.path("real/up")).unwrap();

        let summary = fx.scan();
        // real/a.png is reached once; alias and real/up lead back to visited directories
        assert_eq!(summary.new_count, 1);
    }

    #[test]
    fn test_followed_symlinks_descend_nested_directories() {
        let mut fx = Fixture::new();
        fx.config.follow_symlinks = true;
        fx.write("a/b/c.png", b"c");
        fx.write("a/d.png", b"d");

        let summary = fx.scan();
        assert_eq!(summary.new_count, 2);
        assert_eq!(summary.directories_scanned, 3);
    }

    #[test]
    fn test_scan_against_sqlite_store() {
        let tmp = TempDir::new().unwrap();
        let root = dunce::canonicalize(tmp.path()).unwrap();
        fs::write(root.join("a.gif"), b"g").unwrap();

        let store = SqliteStore::open_in_memory().unwrap();
        let directory = store.add_directory(&root.to_string_lossy()).unwrap();
        let config = SyncConfig::default();
        let token = AtomicBool::new(false);

        assert_eq!(DirectoryScanner::scan(&directory, &store, &config, &token).unwrap().new_count, 1);
        fs::remove_file(root.join("a.gif")).unwrap();
        assert_eq!(DirectoryScanner::scan(&directory, &store, &config, &token).unwrap().missing_count, 1);
        fs::write(root.join("a.gif"), b"g").unwrap();
        assert_eq!(DirectoryScanner::scan(&directory, &store, &config, &token).unwrap().found_count, 1);
    }
}
