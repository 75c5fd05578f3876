//! One thread per input directory. Scans, debounced watcher paths and submitted
//! events for a directory all pass through its queue, so no two reconciliations
//! of that directory ever run at the same time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, trace};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::files::InputDirectory;
use crate::reconcile::Outcome;
use crate::scanner::{DirectoryScanner, ScanSummary};
use crate::store::FileStore;
use crate::updates::{notify_sink, UpdateSink};
use crate::watcher::{DirectoryWatcher, FsEvent};

/// What a worker needs to reconcile one directory.
pub struct SyncContext {
    pub directory: InputDirectory,
    pub store: Arc<dyn FileStore>,
    pub config: Arc<SyncConfig>,
    pub sink: Option<Arc<dyn UpdateSink>>,
}

impl SyncContext {
    /// Paths the engine tracks for this directory: inside the root, a supported
    /// extension, and not hidden when hidden paths are ignored.
    pub fn tracks(&self, path: &Path) -> bool {
        let root = self.directory.root();
        path.starts_with(root)
            && self.config.is_supported(path)
            && !(self.config.ignore_hidden && SyncConfig::is_hidden(root, path))
    }

    fn notify(&self) {
        notify_sink(self.store.as_ref(), self.sink.as_deref());
    }
}

pub(crate) enum WorkItem {
    Scan(Sender<Result<ScanSummary, SyncError>>),
    /// A settled path from the debouncer; classified against disk when dequeued
    Path(PathBuf),
    Event(FsEvent),
    Shutdown,
}

pub(crate) struct DirectoryWorker {
    directory_id: i64,
    sender: Sender<WorkItem>,
    interrupt_token: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DirectoryWorker {
    pub fn spawn(ctx: SyncContext) -> Result<Self, SyncError> {
        let directory_id = ctx.directory.id;
        let (sender, receiver) = unbounded::<WorkItem>();
        let interrupt_token = Arc::new(AtomicBool::new(false));

        let worker_token = Arc::clone(&interrupt_token);
        let handle = thread::Builder::new()
            .name(format!("imgsync-dir-{directory_id}"))
            .spawn(move || DirectoryWorker::run(ctx, receiver, worker_token))?;

        Ok(DirectoryWorker {
            directory_id,
            sender,
            interrupt_token,
            handle: Some(handle),
        })
    }

    /// Queues a full scan and blocks until the worker has finished it.
    pub fn scan(&self) -> Result<ScanSummary, SyncError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(WorkItem::Scan(reply_tx))?;
        reply_rx
            .recv()
            .map_err(|_| SyncError::WorkerStopped(self.directory_id))?
    }

    pub fn submit(&self, event: FsEvent) -> Result<(), SyncError> {
        self.send(WorkItem::Event(event))
    }

    pub fn sender(&self) -> Sender<WorkItem> {
        self.sender.clone()
    }

    fn send(&self, item: WorkItem) -> Result<(), SyncError> {
        self.sender
            .send(item)
            .map_err(|_| SyncError::WorkerStopped(self.directory_id))
    }

    /// Stops the worker after the items already queued, interrupting a scan in
    /// progress. Returns once the thread has exited.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.interrupt_token.store(true, Ordering::Release);
        // Fails only if the thread is already gone
        let _ = self.sender.send(WorkItem::Shutdown);
        if handle.join().is_err() {
            error!("Worker for input directory {} panicked", self.directory_id);
        }
    }

    fn run(ctx: SyncContext, receiver: Receiver<WorkItem>, interrupt_token: Arc<AtomicBool>) {
        debug!("Worker started for: {}", ctx.directory.path);

        while let Ok(item) = receiver.recv() {
            match item {
                WorkItem::Scan(reply) => {
                    let result = DirectoryScanner::scan(
                        &ctx.directory,
                        ctx.store.as_ref(),
                        &ctx.config,
                        &interrupt_token,
                    );
                    if result.is_ok() {
                        ctx.notify();
                    }
                    // The requester may have given up waiting
                    let _ = reply.send(result);
                }
                WorkItem::Path(path) => {
                    if !ctx.tracks(&path) {
                        trace!("Ignoring event for: {}", path.display());
                        continue;
                    }
                    match DirectoryWatcher::classify(&path, ctx.store.as_ref(), &ctx.config) {
                        Ok(Some(event)) => DirectoryWorker::handle(&ctx, &event),
                        Ok(None) => trace!("Not a tracked file: {}", path.display()),
                        Err(e) => error!("Failed to classify '{}': {}", path.display(), e),
                    }
                }
                WorkItem::Event(event) => {
                    if ctx.tracks(event.path()) {
                        DirectoryWorker::handle(&ctx, &event);
                    } else {
                        trace!("Ignoring event for: {}", event.path().display());
                    }
                }
                WorkItem::Shutdown => break,
            }
        }

        info!("Worker stopped for: {}", ctx.directory.path);
    }

    fn handle(ctx: &SyncContext, event: &FsEvent) {
        match DirectoryWatcher::handle_event(&ctx.directory, ctx.store.as_ref(), event) {
            Ok(Outcome::Unchanged) => {}
            Ok(_) => ctx.notify(),
            // The event is dropped; the next scan reconciles the path
            Err(e) => error!("Failed to apply {:?}: {}", event, e),
        }
    }
}

impl Drop for DirectoryWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
