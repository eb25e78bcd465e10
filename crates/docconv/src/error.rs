//! Error types for the conversion scheduler

use thiserror::Error;

use crate::types::JobStatus;

/// Result type alias for conversion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Conversion system errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown job id
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Operation not allowed in the job's current state
    #[error("Job {job_id} is {status}, expected pending")]
    InvalidJobState { job_id: String, status: JobStatus },

    /// Document not found in the session
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// A single document failed to extract
    #[error("Extraction failed for '{document_id}': {message}")]
    Extraction { document_id: String, message: String },

    /// Memory never became available within the allowed wait
    #[error(
        "Insufficient memory after waiting {waited_secs}s: {available_gb:.1} GB available, {required_gb:.1} GB required"
    )]
    ResourceExhausted {
        waited_secs: u64,
        available_gb: f64,
        required_gb: f64,
    },

    /// Work was cancelled before it could finish
    #[error("Cancelled")]
    Cancelled,

    /// Persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an extraction error
    pub fn extraction(document_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            document_id: document_id.into(),
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
