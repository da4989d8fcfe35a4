//! Prometheus metrics for the engine.
//!
//! Registered into the server's registry through [`all_metrics`].

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Submissions
// =============================================================================

/// Jobs accepted by family.
pub static JOBS_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("shrinkwrap_jobs_submitted_total", "Total jobs accepted"),
        &["family", "operation"],
    )
    .unwrap()
});

/// Submissions rejected before a record was created.
pub static SUBMISSIONS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "shrinkwrap_submissions_rejected_total",
            "Total submissions rejected during validation",
        ),
        &["reason"], // "validation", "unsupported_format", "unsupported_target"
    )
    .unwrap()
});

// =============================================================================
// Transformation
// =============================================================================

/// Jobs completed by family.
pub static JOBS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("shrinkwrap_jobs_completed_total", "Total jobs completed"),
        &["family"],
    )
    .unwrap()
});

/// Jobs failed by family.
pub static JOBS_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("shrinkwrap_jobs_failed_total", "Total jobs failed"),
        &["family", "reason"], // "timeout", "transform", "store"
    )
    .unwrap()
});

/// Transformer run time in seconds.
pub static TRANSFORM_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "shrinkwrap_transform_duration_seconds",
            "Duration of transformer invocations",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        &["family", "operation"],
    )
    .unwrap()
});

/// Bytes saved across completed jobs. Jobs whose output grew add nothing.
pub static BYTES_SAVED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("shrinkwrap_bytes_saved_total", "Total bytes saved"),
        &["family"],
    )
    .unwrap()
});

// =============================================================================
// Retention
// =============================================================================

/// Records removed by the sweeper.
pub static SWEEPER_DELETIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "shrinkwrap_sweeper_deletions_total",
        "Total expired jobs removed by the cleanup sweeper",
    )
    .unwrap()
});

/// Artifact removals that failed during a sweep.
pub static SWEEPER_ARTIFACT_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "shrinkwrap_sweeper_artifact_errors_total",
        "Total artifact deletions that failed during sweeps",
    )
    .unwrap()
});

/// Get all engine metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(SUBMISSIONS_REJECTED.clone()),
        Box::new(JOBS_COMPLETED.clone()),
        Box::new(JOBS_FAILED.clone()),
        Box::new(TRANSFORM_DURATION.clone()),
        Box::new(BYTES_SAVED.clone()),
        Box::new(SWEEPER_DELETIONS.clone()),
        Box::new(SWEEPER_ARTIFACT_ERRORS.clone()),
    ]
}
