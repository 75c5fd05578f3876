use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{error, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::files::InputDirectory;
use crate::scanner::{DirectoryScanner, ScanSummary};
use crate::store::FileStore;
use crate::updates::{notify_sink, UpdateSink};
use crate::watcher::{DirectoryWatcher, WatchHandle};
use crate::worker::{DirectoryWorker, SyncContext};

/// Runs the scan-then-watch lifecycle for input directories.
pub struct SyncCoordinator {
    store: Arc<dyn FileStore>,
    config: Arc<SyncConfig>,
    sink: Option<Arc<dyn UpdateSink>>,
}

impl SyncCoordinator {
    pub fn new(store: Arc<dyn FileStore>, config: SyncConfig) -> Self {
        SyncCoordinator {
            store,
            config: Arc::new(config),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn UpdateSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.store
    }

    /// One full scan with no watch afterwards.
    pub fn scan(
        &self,
        directory: &InputDirectory,
        interrupt_token: &Arc<AtomicBool>,
    ) -> Result<ScanSummary, SyncError> {
        let summary =
            DirectoryScanner::scan(directory, self.store.as_ref(), &self.config, interrupt_token)?;
        notify_sink(self.store.as_ref(), self.sink.as_deref());
        Ok(summary)
    }

    /// Scans `directory` to completion, then watches it.
    ///
    /// A failed scan is returned and no watch is started. A failed watch start is
    /// also returned, but the scan's writes stand.
    pub fn start_sync(&self, directory: &InputDirectory) -> Result<WatchHandle, SyncError> {
        let worker = DirectoryWorker::spawn(SyncContext {
            directory: directory.clone(),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            sink: self.sink.clone(),
        })?;

        // The worker is dropped (and stopped) on either error path
        let summary = worker.scan()?;
        info!(
            "Initial scan of {}: {} changes, {} unchanged",
            directory.path,
            summary.change_count(),
            summary.unchanged_count
        );

        DirectoryWatcher::attach(directory, &self.config, worker).map_err(|e| {
            warn!(
                "Scan of {} is complete but live updates are unavailable: {}",
                directory.path, e
            );
            e
        })
    }

    /// Starts syncing every registered input directory. A directory that fails
    /// to scan or watch is logged and left out; the rest still start.
    pub fn start_all(&self) -> Result<SyncSession, SyncError> {
        let mut session = SyncSession::default();

        for directory in self.store.get_directories()? {
            match self.start_sync(&directory) {
                Ok(handle) => session.handles.push(handle),
                Err(e) => {
                    error!("Could not sync {}: {}", directory.path, e);
                    session.failures.push((directory, e));
                }
            }
        }

        info!(
            "Syncing {} input directories ({} failed)",
            session.handles.len(),
            session.failures.len()
        );
        Ok(session)
    }
}

/// Every watch started by `SyncCoordinator::start_all`.
#[derive(Default)]
pub struct SyncSession {
    handles: Vec<WatchHandle>,
    failures: Vec<(InputDirectory, SyncError)>,
}

impl SyncSession {
    pub fn handles(&self) -> &[WatchHandle] {
        &self.handles
    }

    pub fn failures(&self) -> &[(InputDirectory, SyncError)] {
        &self.failures
    }

    pub fn close(self) {
        for handle in self.handles {
            handle.close();
        }
    }
}
