pub mod admin;
pub mod error;
pub mod files;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod routes;

pub use error::{ApiError, ErrorResponse};
pub use middleware::{Tier, CALLER_TIER_HEADER};
pub use routes::create_router;
