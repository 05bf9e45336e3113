//! Error types for Furniar
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::storage::StorageError;

/// Application-wide error type
///
/// This enum represents all possible errors that can occur
/// in the application. It implements `IntoResponse` to
/// automatically convert errors to appropriate HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Content type outside the upload allow-list (415)
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Upload larger than the configured limit (413)
    #[error("File too large: exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Object storage error (403/502/504)
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Storage failures are logged in full where they happen; clients only
    /// see a generic message plus the failure kind.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message, error_type) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "not_found"),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "validation"),
            AppError::UnsupportedMediaType(_) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                self.to_string(),
                "unsupported_media_type",
            ),
            AppError::PayloadTooLarge { .. } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                self.to_string(),
                "payload_too_large",
            ),
            AppError::Storage(err) => {
                let status = match err {
                    StorageError::InsufficientPermission { .. } => StatusCode::FORBIDDEN,
                    StorageError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                let body = Json(serde_json::json!({
                    "error": "Upload failed",
                    "kind": err.kind(),
                }));
                record_error(err.kind());
                return (status, body).into_response();
            }
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "config"),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "internal",
            ),
        };

        record_error(error_type);

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

fn record_error(error_type: &str) {
    use crate::metrics::ERRORS_TOTAL;
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
