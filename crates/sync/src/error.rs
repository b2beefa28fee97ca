//! Error taxonomy for the sync engine.
//!
//! Only [`SyncError::Parse`], [`SyncError::Read`] and folder-level store
//! failures abort a sync.  Per-note failures are caught by the applier and
//! reported in [`crate::SyncResult::errors`]; watch failures restart the
//! watcher.

use std::path::PathBuf;

use thiserror::Error;

pub type SyncOutcome<T> = Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to parse BBT export: {0}")]
    Parse(String),

    #[error("Could not read export file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("BBT export file not found: {0}")]
    ExportMissing(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl SyncError {
    pub fn parse(message: impl Into<String>) -> Self {
        SyncError::Parse(message.into())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

/// Failure of a single note-store call.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("file already exists: {0}")]
    AlreadyExists(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("invalid vault path: {0}")]
    InvalidPath(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
