//! Unified error types for grokgate.

use serde_json::{json, Value};
use thiserror::Error;

/// Main error type for all gateway operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    /// Request rejected synchronously: bad token shape, empty transcript,
    /// wrong message role, unknown model. Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Every credential for the model has been tried and retired.
    #[error("No usable credential remains for model {model}")]
    PoolExhausted { model: String },

    /// Upstream embedded an error object in an otherwise-200 stream.
    #[error("Upstream rate limit")]
    RateLimited,

    /// Upstream rejected the call (non-200 status).
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Network request failed (HTTP client).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// File system I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Text-transcript or image upload failed.
    #[error("Upload error: {0}")]
    Upload(String),

    /// Image retrieval failed after bounded retries.
    #[error("Image error: {0}")]
    Image(String),

    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for gateway operations.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// OpenAI-style error body: `{"error": {"message", "type"}}`.
    pub fn to_body(&self) -> Value {
        json!({
            "error": {
                "message": self.to_string(),
                "type": self.type_tag(),
            }
        })
    }

    /// Coarse type tag for the error body.
    pub fn type_tag(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "invalid_request_error",
            AppError::RateLimited => "rate_limit_error",
            _ => "server_error",
        }
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Upstream(s)
    }
}
