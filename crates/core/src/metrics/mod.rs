//! Size metrics and operational counters.

pub mod calculator;
pub mod counters;

pub use calculator::{compression_ratio, SizeMetrics};
pub use counters::all_metrics;
