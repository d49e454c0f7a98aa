//! Error types for codetrack-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The destination refused the operation (missing bucket, no write permission).
    #[error("destination rejected operation: {reason}")]
    Destination { reason: String },

    /// JSON serialization error (session markers).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// True for errors that the operator has to fix before uploads can succeed.
    pub fn is_destination(&self) -> bool {
        matches!(self, SyncError::Destination { .. })
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
