//! Storage Errors
//!
//! Every fallible storage operation returns [`StorageError`]. I/O failures
//! carry the path they happened on, since an engine only ever touches its log
//! file, the log's directory and the compaction temp file.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error on the log, its directory or the compaction temp file
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A key or value that cannot be represented in the log format
    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },

    /// Background compaction was requested outside a Tokio runtime
    #[error("background compaction requires a running Tokio runtime")]
    NoRuntime,
}

impl StorageError {
    /// Wraps an `io::Error` with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Returns true if this is an I/O error.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
