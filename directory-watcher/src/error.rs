//! Error types for the directory watcher.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur in the directory watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// A root is missing or not a directory.
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// None of the configured roots could be watched.
    #[error("no directories could be watched")]
    NothingWatched,

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
}
