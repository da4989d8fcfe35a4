//! Prometheus metrics for the HTTP surface.
//!
//! Request metrics are recorded by the middleware; pool gauges are refreshed
//! from the engine right before each scrape. Job and sweeper counters live in
//! the core crate and are registered here alongside.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use regex_lite::Regex;
use tracing::warn;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "shrinkwrap_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 120.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("shrinkwrap_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "shrinkwrap_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Worker Pool Metrics (collected dynamically)
// =============================================================================

/// Engine accepting submissions (1) or stopped (0).
pub static ENGINE_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "shrinkwrap_engine_running",
        "Whether the engine accepts submissions (1) or not (0)",
    )
    .unwrap()
});

/// Jobs currently transforming.
pub static POOL_ACTIVE_JOBS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "shrinkwrap_pool_active_jobs",
        "Number of jobs currently transforming",
    )
    .unwrap()
});

/// Jobs waiting for a worker slot.
pub static POOL_QUEUED_JOBS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "shrinkwrap_pool_queued_jobs",
        "Number of jobs waiting for a worker",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Pool
    registry.register(Box::new(ENGINE_RUNNING.clone())).unwrap();
    registry
        .register(Box::new(POOL_ACTIVE_JOBS.clone()))
        .unwrap();
    registry
        .register(Box::new(POOL_QUEUED_JOBS.clone()))
        .unwrap();

    // Core metrics (jobs, transforms, sweeper)
    for metric in shrinkwrap_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Refresh pool gauges from the engine before a scrape.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.engine().pool_status().await;
    ENGINE_RUNNING.set(if status.running { 1 } else { 0 });
    POOL_ACTIVE_JOBS.set(status.active_jobs as i64);
    POOL_QUEUED_JOBS.set(status.queued_jobs as i64);
}

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

static FILE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/files/[^/]+$").unwrap());

/// Normalize a path for metric labels (replace IDs and artifact names with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_RE.replace_all(path, "{id}");
    let result = FILE_RE.replace_all(&result, "/files/{identity}");
    result.to_string()
}
