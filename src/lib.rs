//! Furniar - asset storage service for the furniture retailer dashboard
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - POST /api/upload (multipart)                             │
//! │  - GET /api/files/signed-url                                │
//! │  - /health, /metrics                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Storage Layer                            │
//! │  - Session authorization (cached, re-authorized on expiry)  │
//! │  - Upload URL negotiation                                   │
//! │  - SHA-1 verified uploads to Backblaze B2                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `storage`: Backblaze B2 asset storage
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod storage;

use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Asset storage (Backblaze B2)
    pub storage: Arc<storage::AssetStorage>,
}

impl AppState {
    /// Initialize application state
    ///
    /// Storage credentials are not contacted here; the first upload
    /// authorizes.
    ///
    /// # Errors
    /// Returns error if the storage HTTP client cannot be built
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        if config.storage.key_id.is_none() || config.storage.application_key.is_none() {
            tracing::warn!("Storage credentials are not configured; uploads will fail");
        }

        let storage = storage::AssetStorage::new(&config.storage)?;
        tracing::info!(
            bucket = %storage.bucket_name(),
            reference_mode = ?storage.reference_mode(),
            "Asset storage initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            storage: Arc::new(storage),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    let cors_layer = build_cors_layer(&state.config.server);
    let max_bytes = state.config.upload.max_bytes;

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api", api::upload_router(max_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if server.allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::error!(%error, %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health_check() -> &'static str {
    "OK"
}
