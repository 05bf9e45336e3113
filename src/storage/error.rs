//! Storage error taxonomy
//!
//! Every failure of the upload pipeline is reported as a `StorageError`.
//! Messages carry the remote status and message for diagnostics but never
//! the account secret or any authorization token.

use thiserror::Error;

/// Failure of an object-storage operation
#[derive(Debug, Error)]
pub enum StorageError {
    /// Credentials rejected by the authorize call (bad or revoked key).
    #[error("Storage authorization failed{}: {message}", http_status(.status))]
    AuthFailure {
        status: Option<u16>,
        message: String,
    },

    /// Key id or secret is not configured.
    #[error("Storage credentials are not configured: missing {missing}")]
    MissingCredentials { missing: &'static str },

    /// Restricted key lacks a capability on the container, typically
    /// `listBuckets` when resolving the bucket name to its id.
    #[error("Application key lacks the {capability} capability for bucket '{container}' ({detail})")]
    InsufficientPermission {
        container: String,
        capability: &'static str,
        detail: String,
    },

    /// Listing succeeded but no bucket has this exact name.
    #[error("Bucket '{container}' not found")]
    ContainerNotFound { container: String },

    /// The storage endpoint refused the payload.
    #[error("Upload rejected (HTTP {status}): {message}")]
    UploadRejected { status: u16, message: String },

    /// Caller deadline or HTTP client timeout elapsed.
    #[error("Storage request timed out during {operation}")]
    Timeout { operation: &'static str },

    /// Authorization token expired; handled inside the orchestrator.
    #[error("Storage authorization expired")]
    AuthExpired,

    /// 5xx, 408 or 429 from an API call that persisted after retries.
    #[error("Storage service unavailable during {operation} (HTTP {status}): {message}")]
    ServiceUnavailable {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// Network failure that persisted after retries.
    #[error("Storage transport error during {operation}: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// Response the client cannot act on: undecodable body or an
    /// unexpected non-2xx status.
    #[error("Unexpected storage response for {operation}: {message}")]
    InvalidResponse {
        operation: &'static str,
        message: String,
    },
}

impl StorageError {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::AuthFailure { .. } => "auth_failure",
            StorageError::MissingCredentials { .. } => "missing_credentials",
            StorageError::InsufficientPermission { .. } => "insufficient_permission",
            StorageError::ContainerNotFound { .. } => "container_not_found",
            StorageError::UploadRejected { .. } => "upload_rejected",
            StorageError::Timeout { .. } => "timeout",
            StorageError::AuthExpired => "auth_expired",
            StorageError::ServiceUnavailable { .. } => "service_unavailable",
            StorageError::Transport { .. } => "transport",
            StorageError::InvalidResponse { .. } => "invalid_response",
        }
    }

    /// Whether a fresh `store()` call may reasonably succeed.
    pub fn is_resubmittable(&self) -> bool {
        matches!(
            self,
            StorageError::UploadRejected { .. }
                | StorageError::Timeout { .. }
                | StorageError::ServiceUnavailable { .. }
                | StorageError::Transport { .. }
        )
    }

    /// Failures the bounded backoff may retry for idempotent calls.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::ServiceUnavailable { .. } | StorageError::Transport { .. }
        )
    }

    /// Map a reqwest failure to a storage error for `operation`.
    pub(crate) fn from_transport(operation: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return StorageError::Timeout { operation };
        }
        // Endpoint URLs stay out of error text.
        StorageError::Transport {
            operation,
            message: err.without_url().to_string(),
        }
    }
}

fn http_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}
