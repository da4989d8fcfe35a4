//! Errors returned to engine callers.

use thiserror::Error;

use crate::detect::FormatFamily;
use crate::store::StoreError;

/// Error type for engine operations.
///
/// Failures inside a running job are recorded on the job instead; only
/// submission-time rejections and store failures surface here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Cannot convert {family} input to {target}")]
    UnsupportedTargetFormat { family: FormatFamily, target: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The artifact is larger than anonymous callers may download.
    #[error("Sign up required to download {size} bytes (anonymous limit is {limit})")]
    SignupRequired { size: u64, limit: u64 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Engine is not running")]
    NotRunning,

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl EngineError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Label used for rejected-submission metrics.
    pub fn rejection_reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::UnsupportedTargetFormat { .. } => "unsupported_target",
            Self::NotRunning => "not_running",
            _ => "other",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::InvalidTransition { .. } | StoreError::ExpiryAlreadySet(_) => {
                Self::InvalidState(err.to_string())
            }
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: EngineError = StoreError::NotFound("abc".to_string()).into();
        assert!(matches!(err, EngineError::NotFound(id) if id == "abc"));
    }

    #[test]
    fn test_transition_maps_to_invalid_state() {
        let err: EngineError = StoreError::InvalidTransition {
            job_id: "abc".to_string(),
            current: JobStatus::Completed,
            requested: JobStatus::Running,
        }
        .into();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn test_database_error_is_store() {
        let err: EngineError = StoreError::Database("disk I/O error".to_string()).into();
        assert!(matches!(err, EngineError::Store(_)));
        assert_eq!(err.rejection_reason(), "other");
    }

    #[test]
    fn test_rejection_reasons() {
        assert_eq!(EngineError::validation("empty").rejection_reason(), "validation");
        let err = EngineError::UnsupportedTargetFormat {
            family: FormatFamily::Video,
            target: "png".to_string(),
        };
        assert_eq!(err.rejection_reason(), "unsupported_target");
        assert_eq!(err.to_string(), "Cannot convert video input to png");
    }
}
