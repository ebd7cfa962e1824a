//! Error types for the advisor.

use thiserror::Error;

/// Advisor result type.
pub type Result<T> = std::result::Result<T, AdvisorError>;

/// Errors from analysis and gate plumbing.
///
/// Note that `verify` on a gate never returns these: gate failures degrade
/// to passed-with-warning results by design of the workflow (advisory gates
/// must not block authoring).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdvisorError {
    /// Intent analysis failed.
    #[error("Analysis failed: {0}")]
    Analysis(String),

    /// Underlying registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] synapse_registry::RegistryError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AdvisorError {
    fn from(err: serde_json::Error) -> Self {
        AdvisorError::Serialization(err.to_string())
    }
}
