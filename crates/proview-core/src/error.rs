use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the ProView coaching core.
///
/// Every crate in the workspace returns this type so that a failure kind
/// raised deep in the vector store or the LLM boundary reaches the caller
/// unchanged. Variants map one-to-one onto the failure taxonomy exposed to
/// the transport layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviewError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("LLM backend timed out after {}ms", .0.as_millis())]
    BackendTimeout(Duration),

    #[error("LLM output violated the response schema after {attempts} attempt(s): {reason}")]
    SchemaViolation { attempts: u32, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ProviewError {
    /// Whether the failure came from an external dependency and may succeed
    /// if the same call is repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviewError::Embedding(_)
                | ProviewError::BackendUnavailable(_)
                | ProviewError::BackendTimeout(_)
        )
    }

    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviewError::NotFound(_) => "not_found",
            ProviewError::Validation(_) => "validation_error",
            ProviewError::Storage(_) => "storage_error",
            ProviewError::Embedding(_) => "embedding_error",
            ProviewError::BackendUnavailable(_) => "backend_unavailable",
            ProviewError::BackendTimeout(_) => "backend_timeout",
            ProviewError::SchemaViolation { .. } => "schema_violation",
            ProviewError::Config(_) => "config_error",
            ProviewError::Io(_) => "io_error",
            ProviewError::Serialization(_) => "serialization_error",
        }
    }
}

impl From<toml::de::Error> for ProviewError {
    fn from(err: toml::de::Error) -> Self {
        ProviewError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ProviewError {
    fn from(err: toml::ser::Error) -> Self {
        ProviewError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ProviewError {
    fn from(err: serde_json::Error) -> Self {
        ProviewError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for ProView operations.
pub type Result<T> = std::result::Result<T, ProviewError>;
