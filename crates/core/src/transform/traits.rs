//! The transformer interface.

use async_trait::async_trait;

use super::error::TransformError;
use super::options::TransformOptions;
use super::types::{ProgressSender, TransformJob, TransformOutput};
use crate::detect::FormatFamily;
use crate::job::Operation;

/// Compresses or converts files of one format family.
///
/// Every invocation writes exactly one file to `job.output_path`. On any
/// error the implementation removes whatever it wrote there.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Returns the name of this transformer implementation.
    fn name(&self) -> &str;

    /// The family this transformer handles.
    fn family(&self) -> FormatFamily;

    /// Source formats this transformer can read.
    fn supported_inputs(&self) -> &[&str];

    /// Formats `convert` can produce.
    fn supported_targets(&self) -> &[&str];

    fn supports_input(&self, format: &str) -> bool {
        self.supported_inputs().contains(&format)
    }

    fn supports_target(&self, format: &str) -> bool {
        self.supported_targets().contains(&format)
    }

    /// Parses and range-checks caller options, filling defaults from the
    /// preset that matches `operation`.
    fn parse_options(
        &self,
        operation: Operation,
        raw: &serde_json::Value,
    ) -> Result<TransformOptions, TransformError>;

    /// Shrinks the input, keeping its format.
    async fn compress(
        &self,
        job: &TransformJob,
        progress: Option<ProgressSender>,
    ) -> Result<TransformOutput, TransformError>;

    /// Re-encodes the input into `target`.
    async fn convert(
        &self,
        job: &TransformJob,
        target: &str,
        progress: Option<ProgressSender>,
    ) -> Result<TransformOutput, TransformError>;

    /// Checks that external tools are reachable.
    async fn validate(&self) -> Result<(), TransformError> {
        Ok(())
    }
}

/// Removes a partial output, ignoring a file that was never created.
pub(crate) async fn discard_output(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove partial output {}: {}", path.display(), e);
        }
    }
}
