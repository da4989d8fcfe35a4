//! Core job data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::detect::FormatFamily;

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Shrink the file, keeping its format.
    Compress,
    /// Re-encode into another format.
    Convert,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compress => "compress",
            Self::Convert => "convert",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compress" => Ok(Self::Compress),
            "convert" => Ok(Self::Convert),
            other => Err(format!("unknown operation: {}", other)),
        }
    }
}

/// Status of a job.
///
/// Transitions only move forward: Pending -> Running -> {Completed | Failed},
/// or Pending -> Failed when a job cannot be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [Self::Pending, Self::Running, Self::Completed, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether this is a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    /// Every status that may move to `next`.
    pub fn sources_of(next: JobStatus) -> impl Iterator<Item = JobStatus> {
        Self::ALL
            .into_iter()
            .filter(move |status| status.can_transition_to(next))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Authorization level of the caller, supplied by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerTier {
    #[default]
    Anonymous,
    Registered,
    Premium,
}

impl CallerTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Registered => "registered",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for CallerTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallerTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anonymous" => Ok(Self::Anonymous),
            "registered" => Ok(Self::Registered),
            "premium" => Ok(Self::Premium),
            other => Err(format!("unknown caller tier: {}", other)),
        }
    }
}

/// The tracked state of one transformation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job ID (UUID v4).
    pub id: String,
    /// File name as uploaded.
    pub original_name: String,
    /// Upload size in bytes (always > 0).
    pub original_size: u64,
    /// MIME type detected from the content.
    pub mime_type: String,
    /// MIME type the caller claimed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_mime_type: Option<String>,
    /// Format family that selected the transformer.
    pub family: FormatFamily,
    /// Detected source format (`jpeg`, `mp4`, ...).
    pub source_format: String,
    pub operation: Operation,
    /// Requested output format, set for conversions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_format: Option<String>,
    /// Validated transformer options.
    pub options: serde_json::Value,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_size: Option<u64>,
    /// Percentage saved; negative when the output grew.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<i64>,
    /// Hex SHA-256 of the stored artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Set once, when the job completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Whether the artifact's retention window has elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Output format: the conversion target, or the source format for compression.
    pub fn output_format(&self) -> &str {
        self.target_format.as_deref().unwrap_or(&self.source_format)
    }
}

/// Data captured at submission, before a record exists.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub original_name: String,
    pub original_size: u64,
    pub mime_type: String,
    pub declared_mime_type: Option<String>,
    pub family: FormatFamily,
    pub source_format: String,
    pub operation: Operation,
    pub target_format: Option<String>,
    pub options: serde_json::Value,
}

/// Output details written when a job completes.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub output_identity: String,
    pub output_path: PathBuf,
    pub output_size: u64,
    pub compression_ratio: i64,
    pub output_sha256: String,
    pub expires_at: DateTime<Utc>,
}
