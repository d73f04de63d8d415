//! Error types for nodedeps-sync.

use std::path::PathBuf;

use thiserror::Error;

use nodedeps_core::TreeError;

/// Expected failures that abandon the current operation without raising.
///
/// Callers of [`DependencySync::sync`](crate::DependencySync::sync) and
/// [`NativeRebuild::rebuild_if_non_portable`](crate::NativeRebuild::rebuild_if_non_portable)
/// never see these: they are logged, staging is discarded and the operation
/// reports "no change".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    #[error("package {name} was not found in the registry")]
    PackageNotFound { name: String },

    #[error("no version matching {request} was found")]
    VersionNotFound { request: String },

    #[error("package registry is unreachable: {detail}")]
    RegistryUnreachable { detail: String },

    #[error("installed path {path} cannot be represented on every platform")]
    IncompatiblePathNames { path: PathBuf },

    #[error("native rebuild failed: {detail}")]
    RebuildFailed { detail: String },
}

/// All errors that can arise from sync and rebuild operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A recoverable abort; see [`AbortReason`].
    #[error("aborted: {0}")]
    Recoverable(#[from] AbortReason),

    /// The dependency root changed shape underneath a running update.
    #[error("dependency root {path} is corrupted: {detail}")]
    Corrupted { path: PathBuf, detail: String },

    /// An error from the tree model or lock file layer.
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The external tool failed in a way that is not an expected abort.
    #[error("`{command}` failed: {detail}")]
    Tool { command: String, detail: String },

    /// A caller passed an argument that violates an API contract.
    #[error("precondition violated: {0}")]
    Precondition(String),
}

impl SyncError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::Recoverable(_))
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
