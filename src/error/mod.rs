use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for sitegate operations
pub type Result<T> = std::result::Result<T, GateError>;

/// sitegate error types
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shared store unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    QuotaExceeded { retry_after: u64 },

    #[error("Cache population failed: {0}")]
    CachePopulation(String),

    #[error("Content not found: {0}")]
    ContentNotFound(String),

    #[error("Revocation check failed: {0}")]
    RevocationCheck(String),

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GateError::CachePopulation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::ContentNotFound(_) => StatusCode::NOT_FOUND,
            GateError::RevocationCheck(_) => StatusCode::UNAUTHORIZED,
            GateError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            GateError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to end users.
    ///
    /// Internal faults are reported generically; their detail only goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            GateError::QuotaExceeded { .. } => "Too many requests, please try again later".to_string(),
            GateError::BackendUnavailable(_) => {
                "Service temporarily unavailable, please try again later".to_string()
            }
            GateError::ContentNotFound(_) => "Content not found".to_string(),
            GateError::RevocationCheck(_) | GateError::InvalidToken(_) => {
                "Authentication failed".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::Serialization(err.to_string())
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            GateError::QuotaExceeded { retry_after } => json!({
                "success": false,
                "message": self.public_message(),
                "retryAfter": retry_after,
            }),
            _ => json!({
                "success": false,
                "message": self.public_message(),
            }),
        };

        (status, Json(body)).into_response()
    }
}
