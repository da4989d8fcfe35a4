//! Job records: the tracked state of each transformation request.

mod types;

pub use types::{CallerTier, JobCompletion, JobRecord, JobStatus, NewJob, Operation};
