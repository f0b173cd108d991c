//! Error types for recall

use thiserror::Error;

/// Result type alias for recall operations
pub type Result<T> = std::result::Result<T, RecallError>;

/// Coarse error taxonomy used by ops counters and the retrieval path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, connection failures, 5xx/429 from embedding or vector index
    Transient,
    /// Malformed configuration (warned and clamped where possible)
    Validation,
    /// Invalid ids, empty inputs that semantically require content
    Contract,
    /// SQL constraint violations and other storage failures
    Persistence,
    /// Profile data requested without consent
    Consent,
}

/// Main error type for recall
#[derive(Error, Debug)]
pub enum RecallError {
    #[error("embedding server unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("invalid request in {component}: {message}")]
    InvalidRequest {
        component: &'static str,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("consent not granted for {0}")]
    ConsentRequired(&'static str),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RecallError {
    /// Map this error onto the five-kind taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecallError::EmbeddingUnavailable(_)
            | RecallError::IndexUnavailable(_)
            | RecallError::Http(_) => ErrorKind::Transient,
            RecallError::Config(_) => ErrorKind::Validation,
            RecallError::InvalidRequest { .. } => ErrorKind::Contract,
            RecallError::Database(_)
            | RecallError::Storage(_)
            | RecallError::Serialization(_)
            | RecallError::Io(_) => ErrorKind::Persistence,
            RecallError::ConsentRequired(_) => ErrorKind::Consent,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn invalid(component: &'static str, message: impl Into<String>) -> Self {
        RecallError::InvalidRequest {
            component,
            message: message.into(),
        }
    }
}
