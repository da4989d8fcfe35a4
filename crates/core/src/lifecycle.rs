//! Artifact lifecycle: persisting outputs, gating access on expiry, and
//! deleting artifacts together with their records.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::detect::extension_for_format;
use crate::job::{JobCompletion, JobRecord, JobStatus};
use crate::metrics::SizeMetrics;
use crate::store::{ArtifactStore, JobStore, StoreError};

/// Longest stem kept from the uploaded file name.
const MAX_STEM_LEN: usize = 64;

/// Where an artifact was written and what it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedArtifact {
    /// Collision-resistant name the artifact is fetched by.
    pub identity: String,
    pub path: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the bytes.
    pub sha256: String,
}

/// Combines the record store and the artifact store under one retention policy.
pub struct Lifecycle {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    retention: Duration,
}

impl Lifecycle {
    pub fn new(jobs: Arc<dyn JobStore>, artifacts: Arc<dyn ArtifactStore>, retention: Duration) -> Self {
        Self {
            jobs,
            artifacts,
            retention,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Writes `bytes` under a fresh identity derived from the job.
    pub async fn persist(&self, job: &JobRecord, bytes: &[u8]) -> Result<PersistedArtifact, StoreError> {
        let identity = output_identity(job, Utc::now());
        let path = self.artifacts.write(&identity, bytes).await?;
        debug!("Persisted {} bytes for job {} as {}", bytes.len(), job.id, identity);

        Ok(PersistedArtifact {
            identity,
            path,
            size: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(bytes)),
        })
    }

    /// Persists the output and moves the record to Completed with its expiry.
    ///
    /// If the record cannot be completed the artifact is removed again.
    pub async fn complete(
        &self,
        job: &JobRecord,
        bytes: &[u8],
        metrics: SizeMetrics,
    ) -> Result<JobRecord, StoreError> {
        let artifact = self.persist(job, bytes).await?;
        let completion = JobCompletion {
            output_identity: artifact.identity.clone(),
            output_path: artifact.path,
            output_size: artifact.size,
            compression_ratio: metrics.ratio_percent,
            output_sha256: artifact.sha256,
            expires_at: Utc::now() + self.retention,
        };

        match self.jobs.complete(&job.id, completion) {
            Ok(record) => Ok(record),
            Err(e) => {
                if let Err(remove_err) = self.artifacts.remove(&artifact.identity).await {
                    warn!("Failed to remove orphaned artifact {}: {}", artifact.identity, remove_err);
                }
                Err(e)
            }
        }
    }

    /// Sets the expiry of a Completed record to now + `ttl`. Only ever once.
    pub fn mark_expiry(&self, job_id: &str, ttl: Duration) -> Result<JobRecord, StoreError> {
        self.jobs.mark_expiry(job_id, Utc::now() + ttl)
    }

    /// The record owning `identity`, if its artifact may still be served at `now`.
    pub fn resolve(&self, identity: &str, now: DateTime<Utc>) -> Result<JobRecord, StoreError> {
        let not_found = || StoreError::NotFound(identity.to_string());
        let record = self.jobs.get_by_output_identity(identity)?.ok_or_else(not_found)?;
        if record.status != JobStatus::Completed || record.expires_at.is_none() {
            return Err(not_found());
        }
        if record.is_expired_at(now) {
            debug!("Refusing expired artifact {}", identity);
            return Err(not_found());
        }
        Ok(record)
    }

    /// Reads the artifact of a resolved record.
    pub async fn read(&self, record: &JobRecord) -> Result<Vec<u8>, StoreError> {
        let identity = record
            .output_identity
            .as_deref()
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
        self.artifacts
            .read(identity)
            .await?
            .ok_or_else(|| StoreError::NotFound(identity.to_string()))
    }

    /// Artifact bytes for `identity`; NotFound when unknown, unfinished or expired.
    pub async fn fetch(&self, identity: &str, now: DateTime<Utc>) -> Result<Vec<u8>, StoreError> {
        let record = self.resolve(identity, now)?;
        self.read(&record).await
    }

    /// Records whose expiry is at or before `now`.
    pub fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError> {
        self.jobs.list_expired(now)
    }

    /// Removes a record's artifact, if it has one.
    pub async fn remove_artifact(&self, record: &JobRecord) -> Result<bool, StoreError> {
        match record.output_identity.as_deref() {
            Some(identity) => self.artifacts.remove(identity).await,
            None => Ok(false),
        }
    }

    /// Deletes artifact then record. Deleting twice is not an error.
    ///
    /// Returns whether a record existed.
    pub async fn delete(&self, job_id: &str) -> Result<bool, StoreError> {
        let Some(record) = self.jobs.get(job_id)? else {
            return Ok(false);
        };
        self.remove_artifact(&record).await?;
        let deleted = self.jobs.delete(job_id)?;
        if deleted {
            info!("Deleted job {}", job_id);
        }
        Ok(deleted)
    }
}

/// Builds the artifact name: `<stem>_<operation>_<unix ms>_<random>.<ext>`.
pub fn output_identity(job: &JobRecord, now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}.{}",
        sanitize_stem(&job.original_name),
        job.operation.as_str(),
        now.timestamp_millis(),
        &suffix[..8],
        extension_for_format(job.output_format())
    )
}

/// Reduces a file name to a safe stem of ASCII letters, digits, `-` and `_`.
pub fn sanitize_stem(original_name: &str) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut out = String::with_capacity(stem.len());
    for c in stem.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
        if out.len() >= MAX_STEM_LEN {
            break;
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}
