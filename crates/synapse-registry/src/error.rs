//! Error types for the entity registry.

use thiserror::Error;

/// Registry result type.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur in registry operations.
///
/// Most ingestion-time problems (unreadable files, malformed documents,
/// audit-log hiccups) degrade to warnings instead of surfacing here; the
/// variants below are the genuinely unrecoverable or caller-actionable cases.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// Entity not found in any category.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Invalid checksum string.
    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),

    /// The registry lock could not be acquired within the retry budget.
    #[error("Registry lock contended after {attempts} attempts: {path}")]
    LockContended { path: String, attempts: u32 },

    /// Registry write failed; the batch was aborted with no partial write.
    #[error("Registry write failed: {0}")]
    WriteFailed(String),

    /// A healing backup could not be located for rollback.
    #[error("Backup not found for batch: {0}")]
    BackupNotFound(String),

    /// Creating or retaining a pre-heal backup failed.
    #[error("Backup failed: {0}")]
    BackupFailed(String),

    /// A path escaped the directory it must stay under.
    #[error("Path traversal rejected: {0}")]
    PathTraversal(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem watcher error.
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Serialization(err.to_string())
    }
}

impl From<notify::Error> for RegistryError {
    fn from(err: notify::Error) -> Self {
        RegistryError::Watcher(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegistryError::EntityNotFound("parse-yaml".to_string());
        assert_eq!(err.to_string(), "Entity not found: parse-yaml");

        let err = RegistryError::LockContended {
            path: "/tmp/registry.json.lock".to_string(),
            attempts: 3,
        };
        assert!(err.to_string().contains("3 attempts"));
    }
}
