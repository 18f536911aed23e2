//! Error types for patrol-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::settings::FieldError;

/// All errors that can arise from core state operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (ledger, settings, versions).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A string did not parse as `owner/name` or `owner/name#number`.
    #[error("invalid item reference '{input}': {reason}")]
    InvalidRef { input: String, reason: &'static str },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.patrol/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// A settings update violated the schema; the whole batch was rejected.
    #[error("invalid settings update: {}", format_errors(.errors))]
    InvalidSettings { errors: Vec<FieldError> },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

fn format_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}
