//! Job submission and tracking handlers.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use shrinkwrap_core::{
    FormatFamily, JobFilter, JobRecord, JobReport, JobStatus, Operation, SubmitRequest,
};
use std::sync::Arc;
use tracing::debug;

use super::error::ApiError;
use super::middleware::Tier;
use crate::state::AppState;

/// Maximum allowed limit for job listings
const MAX_LIMIT: i64 = 1000;

/// Default limit for job listings
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for job submission
#[derive(Debug, Default, Deserialize)]
pub struct SubmitParams {
    /// Block until the job reaches a terminal status.
    #[serde(default)]
    pub wait: bool,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by status
    pub status: Option<String>,
    /// Maximum number of jobs to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Response for job operations
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub original_name: String,
    pub original_size: u64,
    pub mime_type: String,
    pub family: FormatFamily,
    pub source_format: String,
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_format: Option<String>,
    pub options: serde_json::Value,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_identity: Option<String>,
    /// Relative URL the artifact can be fetched from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl From<JobRecord> for JobResponse {
    fn from(job: JobRecord) -> Self {
        let download_url = match job.status {
            JobStatus::Completed => job
                .output_identity
                .as_ref()
                .map(|identity| format!("/api/v1/files/{}", identity)),
            _ => None,
        };
        Self {
            id: job.id,
            original_name: job.original_name,
            original_size: job.original_size,
            mime_type: job.mime_type,
            family: job.family,
            source_format: job.source_format,
            operation: job.operation,
            target_format: job.target_format,
            options: job.options,
            status: job.status,
            progress_percent: None,
            output_identity: job.output_identity,
            download_url,
            output_size: job.output_size,
            compression_ratio: job.compression_ratio,
            output_sha256: job.output_sha256,
            error: job.error,
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            finished_at: job.finished_at.map(|t| t.to_rfc3339()),
            expires_at: job.expires_at.map(|t| t.to_rfc3339()),
        }
    }
}

impl From<JobReport> for JobResponse {
    fn from(report: JobReport) -> Self {
        let mut response = JobResponse::from(report.record);
        response.progress_percent = report.progress_percent;
        response
    }
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
    /// Matching jobs across all pages.
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a file for compression or conversion.
///
/// Multipart fields: `file` (required), `operation` (`compress` by default),
/// `target_format`, and `options` as a JSON object.
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Tier(tier): Tier,
    Query(params): Query<SubmitParams>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let request = read_submission(multipart).await?.with_tier(tier);
    let engine = state.engine();

    if params.wait {
        let record = engine.submit_and_wait(request).await?;
        let status = if record.status.is_terminal() {
            StatusCode::OK
        } else {
            StatusCode::ACCEPTED
        };
        Ok((status, Json(JobResponse::from(record))))
    } else {
        let record = engine.submit(request).await?;
        Ok((StatusCode::ACCEPTED, Json(JobResponse::from(record))))
    }
}

/// Get a job with its live progress
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let report = state.engine().status(&id).await?;
    Ok(Json(JobResponse::from(report)))
}

/// List jobs with optional filters
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);
    if let Some(status) = params.status.as_deref() {
        let status: JobStatus = status.parse().map_err(ApiError::bad_request)?;
        filter = filter.with_status(status);
    }

    let jobs = state.engine().list_jobs(&filter)?;
    let total = state.engine().count_jobs(&filter)?;
    Ok(Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Cancel a job that has not started yet
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine().cancel(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reads the multipart form into a submission.
async fn read_submission(mut multipart: Multipart) -> Result<SubmitRequest, ApiError> {
    let mut file: Option<(Vec<u8>, String, Option<String>)> = None;
    let mut operation = Operation::Compress;
    let mut target_format: Option<String> = None;
    let mut options = serde_json::Value::Null;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let content_type = field.content_type().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?;
                file = Some((bytes.to_vec(), file_name, content_type));
            }
            "operation" => {
                let text = read_text(field).await?;
                operation = text.parse().map_err(ApiError::bad_request)?;
            }
            "target_format" => {
                let text = read_text(field).await?;
                if !text.trim().is_empty() {
                    target_format = Some(text);
                }
            }
            "options" => {
                let text = read_text(field).await?;
                if !text.trim().is_empty() {
                    options = serde_json::from_str(&text).map_err(|e| {
                        ApiError::bad_request(format!("options must be a JSON object: {}", e))
                    })?;
                }
            }
            other => debug!("Ignoring unknown multipart field {:?}", other),
        }
    }

    let (bytes, file_name, content_type) =
        file.ok_or_else(|| ApiError::bad_request("Missing file field"))?;

    let mut request = SubmitRequest::compress(bytes, file_name).with_options(options);
    request.operation = operation;
    request.target_format = target_format;
    if let Some(mime) = content_type {
        request = request.with_declared_mime(mime);
    }
    Ok(request)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read field: {}", e)))
}
