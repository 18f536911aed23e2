//! Error types for patrol-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from cycle and collector operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from core state (ledger, settings, version store).
    #[error("state error: {0}")]
    Store(#[from] patrol_core::StoreError),

    /// An error from the hosting or isolation collaborators.
    #[error("collaborator error: {0}")]
    Git(#[from] patrol_git::GitError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
