use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use shrinkwrap_core::SanitizedConfig;
use std::sync::Arc;

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub engine_running: bool,
    pub version: String,
    pub config_hash: String,
    pub uptime_secs: i64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let engine_running = state.engine().is_running().await;
    Json(HealthResponse {
        status: if engine_running { "ok" } else { "stopped" }.to_string(),
        engine_running,
        version: env!("CARGO_PKG_VERSION").to_string(),
        config_hash: state.config_hash().to_string(),
        uptime_secs: (Utc::now() - state.started_at()).num_seconds(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Prometheus scrape endpoint
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
