//! Scrape target for the upload and B2 counters in `crate::metrics`

use anyhow::Context;
use axum::{Router, http::header, response::IntoResponse, routing::get};
use prometheus::{Encoder, TextEncoder};

use crate::error::AppError;
use crate::metrics::REGISTRY;

/// Render every registered family in the text exposition format.
async fn scrape() -> Result<impl IntoResponse, AppError> {
    let encoder = TextEncoder::new();
    let body = encoder
        .encode_to_string(&REGISTRY.gather())
        .context("encoding metric families")?;

    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_owned())], body))
}

/// Routes for `GET /metrics`; state-free so it merges into any router.
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(scrape))
}
