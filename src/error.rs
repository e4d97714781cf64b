//! Error types shared by the indexer and searcher pipelines.

use thiserror::Error;

pub type Result<T, E = SearchKitError> = std::result::Result<T, E>;

/// Errors surfaced through completions and synchronous entry points.
#[derive(Debug, Error)]
pub enum SearchKitError {
    /// The item cannot be stored. Reported per item; never aborts a batch.
    #[error("item {} rejected: {reason}", identifier.as_deref().unwrap_or("<unassigned>"))]
    Validation {
        identifier: Option<String>,
        reason: String,
    },

    /// The query could not be built; nothing was executed.
    #[error("invalid query: {0}")]
    Query(String),

    /// SQLite reported a failure. Errors raised by `rank()` arrive here with
    /// their message, since SQLite reports user function errors as text.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Metadata could not be encoded or decoded.
    #[error("metadata error: {0}")]
    Meta(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid index name {0:?}")]
    InvalidIndexName(String),

    /// The job panicked; the lane itself is still running.
    #[error("job on lane {lane} panicked")]
    JobPanicked { lane: String },

    /// The lane shut down before resolving the completion.
    #[error("pipeline lane closed before completion")]
    LaneClosed,
}

impl SearchKitError {
    pub(crate) fn validation(identifier: Option<&str>, reason: impl Into<String>) -> Self {
        SearchKitError::Validation {
            identifier: identifier.map(str::to_owned),
            reason: reason.into(),
        }
    }

    /// Whether this is a per-item validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, SearchKitError::Validation { .. })
    }
}
