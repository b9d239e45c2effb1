//! Error type shared by every record and blob backend.

use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the storage layer.
///
/// Missing records are not errors for `get`, `delete` and
/// `bump_download_count`; only `update` reports [`StoreError::NotFound`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record '{0}' not found")]
    NotFound(String),

    #[error("invalid page request: {0}")]
    InvalidPageRequest(String),

    #[error("invalid page token '{0}'")]
    InvalidPageToken(String),

    #[error("invalid update for record '{id}': {reason}")]
    InvalidUpdate { id: String, reason: String },

    /// A selected backend is missing (or has a malformed) required setting.
    #[error("misconfigured storage backend: {key} {reason}")]
    Misconfigured { key: String, reason: String },

    #[error("request signing failed: {0}")]
    Signing(String),

    /// The backend answered with a non-success status.
    #[error("{operation} failed with status {status}: {body}")]
    Backend {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn misconfigured(key: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::Misconfigured {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status the route layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::NotFound(_) => 404,
            StoreError::InvalidPageRequest(_)
            | StoreError::InvalidPageToken(_)
            | StoreError::InvalidUpdate { .. } => 400,
            StoreError::Backend { .. } | StoreError::Transport(_) => 502,
            StoreError::Misconfigured { .. }
            | StoreError::Signing(_)
            | StoreError::Serialization(_) => 500,
        }
    }
}
