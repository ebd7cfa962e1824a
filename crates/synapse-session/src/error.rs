//! Error types for the session store.

use thiserror::Error;

/// Session result type.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors from session persistence.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The session id would escape the sessions directory.
    #[error("Session id rejected: {0}")]
    PathTraversal(String),

    /// No session document for this id.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}
