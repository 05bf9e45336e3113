//! API layer
//!
//! HTTP handlers for:
//! - Asset uploads and signed download URLs
//! - Metrics (Prometheus)

pub mod metrics;
mod upload;

pub use metrics::metrics_router;
pub use upload::{SignedUrlResponse, UploadResponse, upload_router};
