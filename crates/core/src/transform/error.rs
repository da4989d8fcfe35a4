//! Error types for the transform module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while transforming a file.
#[derive(Debug, Error)]
pub enum TransformError {
    /// An external tool binary could not be executed.
    #[error("{tool} not found at path: {path}")]
    ToolNotFound { tool: String, path: PathBuf },

    /// Input is not something this transformer reads.
    #[error("Unsupported input format: {format}")]
    UnsupportedInputFormat { format: String },

    /// Requested output is outside this transformer's target set.
    #[error("Unsupported target format: {format}")]
    UnsupportedTargetFormat { format: String },

    /// Options failed to parse or are out of range.
    #[error("Invalid options: {reason}")]
    InvalidOptions { reason: String },

    /// The codec or tool reported a failure.
    #[error("Transformation failed: {reason}")]
    TransformationFailed {
        reason: String,
        stderr: Option<String>,
    },

    /// The transformer exceeded its time budget.
    #[error("Transformation timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Input bytes could not be decoded.
    #[error("Failed to decode input: {reason}")]
    Decode { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransformError {
    /// Creates a transformation failed error with optional stderr output.
    pub fn failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::TransformationFailed {
            reason: reason.into(),
            stderr,
        }
    }

    /// Creates an invalid options error.
    pub fn invalid_options(reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            reason: reason.into(),
        }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub fn unsupported_target(format: impl Into<String>) -> Self {
        Self::UnsupportedTargetFormat {
            format: format.into(),
        }
    }

    pub fn tool_not_found(tool: &str, path: &std::path::Path) -> Self {
        Self::ToolNotFound {
            tool: tool.to_string(),
            path: path.to_path_buf(),
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::UnsupportedInputFormat { .. } => "unsupported_input",
            Self::UnsupportedTargetFormat { .. } => "unsupported_target",
            Self::InvalidOptions { .. } => "invalid_options",
            Self::TransformationFailed { .. } => "transform",
            Self::Timeout { .. } => "timeout",
            Self::Decode { .. } => "decode",
            Self::Io(_) => "io",
        }
    }
}

impl From<image::ImageError> for TransformError {
    fn from(err: image::ImageError) -> Self {
        match err {
            // Truncated input surfaces as an I/O error from the in-memory reader.
            image::ImageError::Decoding(e) => Self::decode(e.to_string()),
            image::ImageError::IoError(e) => Self::decode(e.to_string()),
            other => Self::failed(other.to_string(), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransformError::failed("ffmpeg exited with code: Some(1)", None);
        assert_eq!(
            err.to_string(),
            "Transformation failed: ffmpeg exited with code: Some(1)"
        );
        assert_eq!(
            TransformError::Timeout { timeout_secs: 300 }.to_string(),
            "Transformation timed out after 300 seconds"
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(TransformError::unsupported_target("bmp").kind(), "unsupported_target");
        assert_eq!(TransformError::decode("bad header").kind(), "decode");
    }
}
