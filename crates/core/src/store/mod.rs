//! Persistence for job records and artifact bytes.
//!
//! Records and bytes are separate interfaces so either can be swapped; the
//! [`Lifecycle`](crate::lifecycle::Lifecycle) combines them.

mod artifact_store;
mod job_store;
mod sqlite_store;

pub use artifact_store::{ArtifactStore, FsArtifactStore};
pub use job_store::{JobFilter, JobStore, StoreError};
pub use sqlite_store::SqliteJobStore;
