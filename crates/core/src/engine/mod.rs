//! The transform dispatcher.
//!
//! `TransformEngine` validates uploads synchronously, records a Pending job,
//! and runs the matching transformer on a bounded worker pool. Results are
//! persisted through the [`Lifecycle`](crate::lifecycle::Lifecycle) and
//! published to waiters once the job is terminal.
//!
//! # Example
//!
//! ```ignore
//! use shrinkwrap_core::engine::{EngineConfig, LimitsConfig, SubmitRequest, TransformEngine};
//!
//! let engine = TransformEngine::new(config, limits, registry, lifecycle, work_dir);
//! engine.start().await;
//!
//! let record = engine
//!     .submit(SubmitRequest::convert(bytes, "photo.png", "webp"))
//!     .await?;
//! let finished = engine.wait(&record.id, Duration::from_secs(60)).await?;
//! ```

mod config;
mod dispatcher;
mod error;
mod types;

pub use config::{EngineConfig, LimitsConfig, MAX_RETENTION_HOURS};
pub use dispatcher::TransformEngine;
pub use error::EngineError;
pub use types::{Artifact, JobReport, PoolStatus, SubmitRequest};
