//! Error types for patrol-git.

use std::path::PathBuf;

use thiserror::Error;

/// All errors from hosting queries and clone/worktree management.
#[derive(Debug, Error)]
pub enum GitError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A subprocess exited non-zero; stderr is carried for diagnosis.
    #[error("`{program} {args}` failed: {stderr}")]
    Command {
        program: String,
        args: String,
        stderr: String,
    },

    /// The subprocess could not be spawned at all.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON from a `--json` query.
    #[error("unexpected hosting response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`GitError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> GitError {
    GitError::Io {
        path: path.into(),
        source,
    }
}
