//! Pure size arithmetic for finished jobs.

use serde::{Deserialize, Serialize};

/// Percentage of bytes saved, rounded to the nearest integer with halves
/// rounded up (-0.5 becomes 0, 0.5 becomes 1).
///
/// Returns 0 when `original` is 0. A larger output yields a negative value;
/// it is reported as-is, never clamped.
pub fn compression_ratio(original: u64, output: u64) -> i64 {
    if original == 0 {
        return 0;
    }
    let saved = original as f64 - output as f64;
    (saved / original as f64 * 100.0 + 0.5).floor() as i64
}

/// Size figures attached to a completed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeMetrics {
    pub original_size: u64,
    pub output_size: u64,
    /// Negative when the output grew.
    pub bytes_saved: i64,
    pub ratio_percent: i64,
}

impl SizeMetrics {
    pub fn compute(original_size: u64, output_size: u64) -> Self {
        Self {
            original_size,
            output_size,
            bytes_saved: original_size as i64 - output_size as i64,
            ratio_percent: compression_ratio(original_size, output_size),
        }
    }

    /// Whether the transformation made the file smaller.
    pub fn shrank(&self) -> bool {
        self.bytes_saved > 0
    }
}
