use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{admin, files, handlers, jobs, middleware::metrics_middleware};
use crate::state::AppState;

/// Headroom for multipart framing on top of the largest allowed upload.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state
        .engine()
        .limits()
        .premium_max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    // API routes
    let api_routes = Router::new()
        // Health, config and metrics
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::metrics))
        // Jobs
        .route("/jobs", post(jobs::submit_job))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}", delete(jobs::cancel_job))
        // Artifacts
        .route("/files/{identity}", get(files::download_file))
        // Admin
        .route("/admin/cleanup", post(admin::trigger_cleanup))
        .route("/admin/jobs/{id}", delete(admin::delete_job))
        .route("/admin/pool", get(admin::pool_status))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
