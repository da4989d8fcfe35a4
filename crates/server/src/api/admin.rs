//! Operator endpoints: manual cleanup, forced deletion, pool status.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use shrinkwrap_core::PoolStatus;
use std::sync::Arc;
use tracing::info;

use super::error::ApiError;
use crate::state::AppState;

/// Response for a manual cleanup run
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    /// Expired jobs removed by this run.
    pub deleted: usize,
}

/// Run the expiry sweep now
pub async fn trigger_cleanup(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let deleted = state.engine().trigger_cleanup().await?;
    info!("Manual cleanup removed {} expired jobs", deleted);
    Ok(Json(CleanupResponse { deleted }))
}

/// Delete a job and its artifact regardless of expiry
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Worker pool status
pub async fn pool_status(State(state): State<Arc<AppState>>) -> Json<PoolStatus> {
    Json(state.engine().pool_status().await)
}
