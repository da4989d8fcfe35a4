//! Job record storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::{JobCompletion, JobRecord, JobStatus, NewJob};

/// Errors from the record and artifact stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The record is not in a status that allows the requested change.
    #[error("Cannot move job {job_id} from {current} to {requested}")]
    InvalidTransition {
        job_id: String,
        current: JobStatus,
        requested: JobStatus,
    },

    /// Expiry is written once and never moved.
    #[error("Expiry already set for job {0}")]
    ExpiryAlreadySet(String),

    /// Artifact names must be plain file names.
    #[error("Invalid artifact name: {0}")]
    InvalidName(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Filter for querying job records.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Storage backend for job records.
///
/// Status changes are compare-and-set against the current status, so a
/// backend never lets a record move backwards or re-enter a status.
pub trait JobStore: Send + Sync {
    /// Creates a Pending record with a fresh ID.
    fn create(&self, job: NewJob) -> Result<JobRecord, StoreError>;

    fn get(&self, id: &str) -> Result<Option<JobRecord>, StoreError>;

    fn get_by_output_identity(&self, identity: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Lists records, newest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError>;

    fn count(&self, filter: &JobFilter) -> Result<i64, StoreError>;

    /// Pending -> Running.
    fn mark_running(&self, id: &str) -> Result<JobRecord, StoreError>;

    /// Running -> Completed, writing the output fields and expiry together.
    fn complete(&self, id: &str, completion: JobCompletion) -> Result<JobRecord, StoreError>;

    /// Pending or Running -> Failed.
    fn fail(&self, id: &str, error: &str) -> Result<JobRecord, StoreError>;

    /// Sets expiry on a Completed record that has none.
    fn mark_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<JobRecord, StoreError>;

    /// Records whose `expires_at` is at or before `now`, oldest expiry first.
    fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError>;

    /// Removes a record. Returns whether a row existed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
}
