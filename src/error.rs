use rusqlite::Error as RusqliteError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into SyncError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Watcher error: {0}")]
    WatcherError(#[from] notify::Error),

    #[error("Root directory '{}' is unreadable: {source}", path.display())]
    RootUnreadable { path: PathBuf, source: io::Error },

    #[error("Scan interrupted")]
    ScanInterrupted,

    #[error("Sync worker for input directory {0} is not running")]
    WorkerStopped(i64),

    #[error("Invalid project: {0}")]
    InvalidProject(String),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}
