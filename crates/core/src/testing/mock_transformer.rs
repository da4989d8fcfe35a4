//! Mock transformer for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::detect::FormatFamily;
use crate::job::Operation;
use crate::transform::{
    AudioOptions, DocumentOptions, ImageOptions, ProgressSender, QualityPreset, TransformError,
    TransformJob, TransformOptions, TransformOutput, TransformProgress, Transformer, VideoOptions,
    WorkerSlot,
};

/// A recorded invocation for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedTransform {
    pub job: TransformJob,
    /// Conversion target, `None` for compress.
    pub target: Option<String>,
    pub success: bool,
}

/// Mock implementation of the Transformer trait.
///
/// Options are parsed exactly like the real transformer of the family. By
/// default the output is the first half of the input, so every job "shrinks".
///
/// # Example
///
/// ```rust,ignore
/// use shrinkwrap_core::testing::MockTransformer;
///
/// let mock = MockTransformer::new(FormatFamily::Image);
/// registry.register(Arc::new(mock.clone()));
///
/// mock.set_next_error(TransformError::failed("boom", None)).await;
/// // ... submit a job ...
/// assert_eq!(mock.transform_count().await, 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockTransformer {
    family: FormatFamily,
    inputs: &'static [&'static str],
    targets: &'static [&'static str],
    transforms: Arc<RwLock<Vec<RecordedTransform>>>,
    /// If set, the next invocation fails with this error.
    next_error: Arc<RwLock<Option<TransformError>>>,
    /// Simulated work time in milliseconds.
    delay_ms: Arc<RwLock<u64>>,
    /// Simulated CPU-bound work on the blocking pool, in milliseconds.
    blocking_ms: Arc<RwLock<u64>>,
    /// Fixed output bytes instead of the halved input.
    output: Arc<RwLock<Option<Vec<u8>>>>,
}

impl MockTransformer {
    /// A mock accepting the same formats as the real transformer for `family`.
    pub fn new(family: FormatFamily) -> Self {
        let (inputs, targets): (&'static [&'static str], &'static [&'static str]) = match family {
            FormatFamily::Image => (&["jpeg", "png", "gif", "webp"], &["jpeg", "png", "webp", "gif"]),
            FormatFamily::Video => (&["mp4", "mov", "webm", "mkv", "avi"], &["mp4", "webm", "avi", "mov"]),
            FormatFamily::Audio => (
                &["mp3", "aac", "wav", "ogg", "flac", "m4a"],
                &["mp3", "wav", "aac", "ogg"],
            ),
            FormatFamily::Document => (&["pdf"], &["pdf", "png", "jpeg"]),
        };
        Self {
            family,
            inputs,
            targets,
            transforms: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            delay_ms: Arc::new(RwLock::new(10)),
            blocking_ms: Arc::new(RwLock::new(0)),
            output: Arc::new(RwLock::new(None)),
        }
    }

    /// Get all recorded invocations.
    pub async fn recorded_transforms(&self) -> Vec<RecordedTransform> {
        self.transforms.read().await.clone()
    }

    /// Number of invocations that ran to the end.
    pub async fn transform_count(&self) -> usize {
        self.transforms.read().await.len()
    }

    /// Configure the next invocation to fail with the given error.
    pub async fn set_next_error(&self, error: TransformError) {
        *self.next_error.write().await = Some(error);
    }

    /// Set the simulated work time.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay_ms.write().await = delay.as_millis() as u64;
    }

    /// Set the simulated blocking work time. Unlike the async delay this
    /// keeps running after a timeout drops the invocation.
    pub async fn set_blocking_delay(&self, delay: Duration) {
        *self.blocking_ms.write().await = delay.as_millis() as u64;
    }

    /// Always write `bytes` as the output.
    pub async fn set_output(&self, bytes: Vec<u8>) {
        *self.output.write().await = Some(bytes);
    }

    async fn take_error(&self) -> Option<TransformError> {
        self.next_error.write().await.take()
    }

    async fn record(&self, job: &TransformJob, target: Option<&str>, success: bool) {
        // The recorded copy must not keep the worker slot alive.
        let job = TransformJob {
            slot: WorkerSlot::detached(),
            ..job.clone()
        };
        self.transforms.write().await.push(RecordedTransform {
            job,
            target: target.map(str::to_string),
            success,
        });
    }

    async fn report(progress: &Option<ProgressSender>, job: &TransformJob, percent: f32) {
        if let Some(tx) = progress {
            let _ = tx
                .send(TransformProgress {
                    job_id: job.job_id.clone(),
                    percent,
                    time_secs: 0.0,
                    speed: Some("10x".to_string()),
                })
                .await;
        }
    }

    async fn run(
        &self,
        job: &TransformJob,
        target: Option<&str>,
        progress: Option<ProgressSender>,
    ) -> Result<TransformOutput, TransformError> {
        let started = Instant::now();
        Self::report(&progress, job, 0.0).await;

        let delay_ms = *self.delay_ms.read().await;
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let blocking_ms = *self.blocking_ms.read().await;
        if blocking_ms > 0 {
            job.slot
                .run_blocking(move || {
                    std::thread::sleep(Duration::from_millis(blocking_ms));
                    Ok(())
                })
                .await?;
        }

        if let Some(err) = self.take_error().await {
            self.record(job, target, false).await;
            return Err(err);
        }

        let fixed = self.output.read().await.clone();
        let bytes = match fixed {
            Some(bytes) => bytes,
            None => {
                let input = tokio::fs::read(&job.input_path).await?;
                input[..(input.len() / 2).max(1).min(input.len())].to_vec()
            }
        };
        tokio::fs::write(&job.output_path, &bytes).await?;

        Self::report(&progress, job, 100.0).await;
        self.record(job, target, true).await;

        Ok(TransformOutput {
            output_path: job.output_path.clone(),
            output_size: bytes.len() as u64,
            output_format: target.unwrap_or(&job.source_format).to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl Transformer for MockTransformer {
    fn name(&self) -> &str {
        "mock"
    }

    fn family(&self) -> FormatFamily {
        self.family
    }

    fn supported_inputs(&self) -> &[&str] {
        self.inputs
    }

    fn supported_targets(&self) -> &[&str] {
        self.targets
    }

    fn parse_options(
        &self,
        operation: Operation,
        raw: &serde_json::Value,
    ) -> Result<TransformOptions, TransformError> {
        let preset = QualityPreset::for_operation(operation);
        Ok(match self.family {
            FormatFamily::Image => TransformOptions::Image(ImageOptions::parse(raw, preset)?),
            FormatFamily::Video => TransformOptions::Video(VideoOptions::parse(raw, preset)?),
            FormatFamily::Audio => TransformOptions::Audio(AudioOptions::parse(raw, preset)?),
            FormatFamily::Document => {
                TransformOptions::Document(DocumentOptions::parse(raw, preset)?)
            }
        })
    }

    async fn compress(
        &self,
        job: &TransformJob,
        progress: Option<ProgressSender>,
    ) -> Result<TransformOutput, TransformError> {
        self.run(job, None, progress).await
    }

    async fn convert(
        &self,
        job: &TransformJob,
        target: &str,
        progress: Option<ProgressSender>,
    ) -> Result<TransformOutput, TransformError> {
        if !self.supports_target(target) {
            return Err(TransformError::unsupported_target(target));
        }
        self.run(job, Some(target), progress).await
    }
}
