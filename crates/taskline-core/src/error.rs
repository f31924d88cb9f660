//! Error types for the task client.

use thiserror::Error;

use crate::TaskId;

/// Errors surfaced by task reads and mutations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Input rejected before any request or cache change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The task does not exist locally or on the server.
    #[error("task not found: {id}")]
    NotFound { id: TaskId },

    /// Transport failure or non-success response from the task server.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Local persistence failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TaskError {
    /// Whether this error came from the remote task server.
    pub fn is_network(&self) -> bool {
        matches!(self, TaskError::Network(_))
    }

    /// Whether this error reports a missing task.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskError::NotFound { .. })
    }
}

impl From<reqwest::Error> for TaskError {
    fn from(err: reqwest::Error) -> Self {
        TaskError::Network(NetworkError::Http(err))
    }
}

/// Errors talking to the remote task server.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("request failed ({status}): {body}")]
    Status { status: u16, body: String },

    /// Response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    /// Whether retrying the same idempotent request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            NetworkError::Http(e) => e.is_timeout() || e.is_connect(),
            NetworkError::Status { status, .. } => *status == 429 || *status >= 500,
            NetworkError::InvalidResponse(_) => false,
        }
    }
}

/// Errors reading or writing the local task copy.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
