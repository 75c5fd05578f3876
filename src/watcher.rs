use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, trace, warn, Level};
use logging_timer::timer;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::files::InputDirectory;
use crate::hash::Hash;
use crate::reconcile::{Observation, Outcome, Reconciler, RecordKey};
use crate::store::FileStore;
use crate::worker::{DirectoryWorker, SyncContext, WorkItem};

/// A settled filesystem change for one path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FsEvent {
    Added(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
}

impl FsEvent {
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Added(path) | FsEvent::Changed(path) | FsEvent::Removed(path) => path,
        }
    }
}

pub struct DirectoryWatcher {}

impl DirectoryWatcher {
    /// Starts watching `directory` without scanning it first. Files already on
    /// disk produce no events; use `SyncCoordinator` to scan then watch.
    pub fn watch(
        directory: &InputDirectory,
        store: Arc<dyn FileStore>,
        config: Arc<SyncConfig>,
    ) -> Result<WatchHandle, SyncError> {
        let worker = DirectoryWorker::spawn(SyncContext {
            directory: directory.clone(),
            store,
            config: Arc::clone(&config),
            sink: None,
        })?;
        DirectoryWatcher::attach(directory, &config, worker)
    }

    /// Points a debounced OS watch at the worker's queue. On failure the worker
    /// is shut down with the error returned.
    pub(crate) fn attach(
        directory: &InputDirectory,
        config: &SyncConfig,
        worker: DirectoryWorker,
    ) -> Result<WatchHandle, SyncError> {
        let root = directory.root();
        let sender = worker.sender();
        let watched_root = root.display().to_string();

        let mut debouncer = new_debouncer(
            config.debounce(),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        if event.kind == DebouncedEventKind::AnyContinuous {
                            // Still being written; a settled event follows
                            continue;
                        }
                        if sender.send(WorkItem::Path(event.path)).is_err() {
                            // Worker is gone: the handle is closing
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Watch error under {}: {:?}", watched_root, e);
                }
            },
        )?;

        debouncer.watcher().watch(root, RecursiveMode::Recursive)?;

        info!(
            "Watching {} (debounce {}ms)",
            root.display(),
            config.debounce_ms
        );

        Ok(WatchHandle {
            directory: directory.clone(),
            debouncer: Some(debouncer),
            worker,
        })
    }

    /// Turns a settled path into an event by looking at what is there now.
    ///
    /// Returns `None` for directories, and for symlinks unless symlinks are followed.
    pub fn classify(
        path: &Path,
        store: &dyn FileStore,
        config: &SyncConfig,
    ) -> Result<Option<FsEvent>, SyncError> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(Some(FsEvent::Removed(path.to_path_buf())));
            }
            Err(e) => {
                // Present but unreadable: the change handler marks it missing
                warn!("Cannot stat '{}': {}", path.display(), e);
                return Ok(Some(FsEvent::Changed(path.to_path_buf())));
            }
        };

        let is_file = if metadata.file_type().is_symlink() {
            config.follow_symlinks && fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
        } else {
            metadata.is_file()
        };
        if !is_file {
            return Ok(None);
        }

        let existing = store.get_file_by_absolute_path(&path.to_string_lossy())?;
        let event = match existing {
            Some(file) if !file.is_missing() => FsEvent::Changed(path.to_path_buf()),
            _ => FsEvent::Added(path.to_path_buf()),
        };
        Ok(Some(event))
    }

    /// Applies one event to the record for its path.
    pub fn handle_event(
        directory: &InputDirectory,
        store: &dyn FileStore,
        event: &FsEvent,
    ) -> Result<Outcome, SyncError> {
        let _tmr = timer!(Level::Trace; "DirectoryWatcher::handle_event", "{:?}", event);

        let path = event.path();
        let observation = match event {
            FsEvent::Added(_) => Observation::Added(Hash::content_hash_of(path)),
            FsEvent::Changed(_) => Observation::Changed(Hash::content_hash_of(path)),
            FsEvent::Removed(_) => Observation::Removed,
        };

        if observation == Observation::Added(None) {
            trace!("Dropping add for unreadable file: {}", path.display());
            return Ok(Outcome::Unchanged);
        }

        let existing = store.get_file_by_absolute_path(&path.to_string_lossy())?;
        Reconciler::new(store, directory, RecordKey::AbsolutePath).apply(
            path,
            &observation,
            existing.as_ref(),
        )
    }
}

/// A live watch. Dropping it has the same effect as `close`.
pub struct WatchHandle {
    directory: InputDirectory,
    debouncer: Option<Debouncer<RecommendedWatcher>>,
    worker: DirectoryWorker,
}

impl WatchHandle {
    pub fn directory(&self) -> &InputDirectory {
        &self.directory
    }

    /// Queues an event as if the OS watch had reported it.
    pub fn submit(&self, event: FsEvent) -> Result<(), SyncError> {
        self.worker.submit(event)
    }

    /// Stops the OS watch and the directory's worker. Once this returns, no
    /// further event for this directory touches the store.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(debouncer) = self.debouncer.take() {
            drop(debouncer);
            info!("Stopped watching {}", self.directory.path);
        }
        self.worker.shutdown();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
