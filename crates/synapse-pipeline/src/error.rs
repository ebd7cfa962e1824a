//! Error types for the prompt pipeline.

use thiserror::Error;

/// Pipeline result type.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors from layer loading and metrics handling.
///
/// The pipeline itself never fails a prompt over these: a layer that
/// errors is marked and skipped, and metrics persistence is best-effort.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// A layer loader failed.
    #[error("Layer failed: {0}")]
    Layer(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}
