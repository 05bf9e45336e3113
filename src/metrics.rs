//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{Counter, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Upload Metrics
    pub static ref UPLOADS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("furniar_uploads_total", "Total number of asset uploads"),
        &["status"]
    ).expect("metric can be created");
    pub static ref UPLOAD_BYTES_TOTAL: Counter = Counter::new(
        "furniar_upload_bytes_total",
        "Total bytes of assets uploaded"
    ).expect("metric can be created");

    // Storage Service Metrics
    pub static ref STORAGE_AUTHORIZATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("furniar_storage_authorizations_total", "Total number of storage account authorizations"),
        &["result"]
    ).expect("metric can be created");
    pub static ref STORAGE_REAUTHORIZATIONS_TOTAL: IntCounter = IntCounter::new(
        "furniar_storage_reauthorizations_total",
        "Total number of re-authorizations after an expired token"
    ).expect("metric can be created");
    pub static ref STORAGE_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "furniar_storage_request_duration_seconds",
            "Storage API request duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["operation"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("furniar_errors_total", "Total number of errors returned to clients"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOADS_TOTAL.clone()))
            .expect("UPLOADS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(UPLOAD_BYTES_TOTAL.clone()))
            .expect("UPLOAD_BYTES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(STORAGE_AUTHORIZATIONS_TOTAL.clone()))
            .expect("STORAGE_AUTHORIZATIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(STORAGE_REAUTHORIZATIONS_TOTAL.clone()))
            .expect("STORAGE_REAUTHORIZATIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(STORAGE_REQUEST_DURATION_SECONDS.clone()))
            .expect("STORAGE_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");
    });
}
