//! Keeps the file records of an image-dataset project in step with the input
//! directories on disk: a full scan when a directory is opened, then a debounced
//! watch that applies the same state transitions to live filesystem events.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod files;
pub mod hash;
pub mod project;
pub mod reconcile;
pub mod scanner;
pub mod schema;
pub mod store;
pub mod updates;
pub mod watcher;
mod worker;

pub use coordinator::{SyncCoordinator, SyncSession};
pub use error::SyncError;
pub use files::{FileStatus, FileUpdate, InputDirectory, InputFile};
pub use scanner::{DirectoryScanner, ScanSummary};
pub use store::{FileStore, MemoryStore, SqliteStore};
pub use watcher::{DirectoryWatcher, FsEvent, WatchHandle};
