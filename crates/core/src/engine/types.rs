//! Types for the engine module.

use serde::{Deserialize, Serialize};

use crate::job::{CallerTier, JobRecord, JobStatus, Operation};

/// An upload plus what to do with it.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub bytes: Vec<u8>,
    pub original_name: String,
    /// MIME type claimed by the caller; only used for diagnostics.
    pub declared_mime_type: Option<String>,
    pub operation: Operation,
    /// Required for conversions.
    pub target_format: Option<String>,
    /// Raw transformer options; `null` selects the preset defaults.
    pub options: serde_json::Value,
    pub tier: CallerTier,
}

impl SubmitRequest {
    /// A compress request with default options.
    pub fn compress(bytes: Vec<u8>, original_name: impl Into<String>) -> Self {
        Self {
            bytes,
            original_name: original_name.into(),
            declared_mime_type: None,
            operation: Operation::Compress,
            target_format: None,
            options: serde_json::Value::Null,
            tier: CallerTier::default(),
        }
    }

    /// A convert request with default options.
    pub fn convert(
        bytes: Vec<u8>,
        original_name: impl Into<String>,
        target_format: impl Into<String>,
    ) -> Self {
        Self {
            operation: Operation::Convert,
            target_format: Some(target_format.into()),
            ..Self::compress(bytes, original_name)
        }
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    pub fn with_tier(mut self, tier: CallerTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_declared_mime(mut self, mime: impl Into<String>) -> Self {
        self.declared_mime_type = Some(mime.into());
        self
    }
}

/// A job record with live progress, for polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    #[serde(flatten)]
    pub record: JobRecord,
    /// 0-100 while queued or running, 100 once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f32>,
}

impl JobReport {
    pub(crate) fn new(record: JobRecord, live_progress: Option<f32>) -> Self {
        let progress_percent = match record.status {
            JobStatus::Pending => Some(0.0),
            JobStatus::Running => Some(live_progress.unwrap_or(0.0)),
            JobStatus::Completed => Some(100.0),
            JobStatus::Failed => None,
        };
        Self {
            record,
            progress_percent,
        }
    }
}

/// A downloadable artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime: String,
    pub size: u64,
}

/// Status of the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Whether submissions are accepted.
    pub running: bool,
    /// Number of jobs currently transforming.
    pub active_jobs: usize,
    /// Maximum concurrent jobs.
    pub max_concurrent: usize,
    /// Number of jobs waiting for a worker.
    pub queued_jobs: usize,
    /// Total jobs completed since startup.
    pub total_processed: u64,
    /// Total jobs failed since startup.
    pub total_failed: u64,
}

