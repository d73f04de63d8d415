//! Error types for nodedeps-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while reading or writing dependency trees.
#[derive(Debug, Error)]
pub enum TreeError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON parse error on load, with the offending file.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The lock file did not exist at the expected path.
    #[error("lock file not found at {path}")]
    LockNotFound { path: PathBuf },

    /// JSON serialization error (write path, tool listings).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`TreeError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> TreeError {
    TreeError::Io {
        path: path.into(),
        source,
    }
}
