//! Types for the transform module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit};

use super::error::TransformError;
use super::options::TransformOptions;

/// One transformer invocation.
#[derive(Debug, Clone)]
pub struct TransformJob {
    pub job_id: String,
    /// Uploaded bytes, written to the job's work directory.
    pub input_path: PathBuf,
    /// Where the transformer must write its single output.
    pub output_path: PathBuf,
    /// Detected source format (`jpeg`, `mp4`, ...).
    pub source_format: String,
    pub options: TransformOptions,
    /// Worker pool slot this invocation runs under.
    pub slot: WorkerSlot,
}

/// Shared hold on a worker pool permit.
///
/// The permit is returned once every clone is dropped. Blocking work takes a
/// clone so the slot stays occupied until the thread actually finishes, even
/// when the async side has already given up on it.
#[derive(Debug, Clone, Default)]
pub struct WorkerSlot(Option<Arc<OwnedSemaphorePermit>>);

impl WorkerSlot {
    pub fn new(permit: OwnedSemaphorePermit) -> Self {
        Self(Some(Arc::new(permit)))
    }

    /// A slot that holds no permit.
    pub fn detached() -> Self {
        Self(None)
    }

    /// Drops this handle's share of the permit.
    pub fn release(&mut self) {
        self.0 = None;
    }

    /// Runs `work` on the blocking pool while holding a share of the slot.
    pub async fn run_blocking<T, F>(&self, work: F) -> Result<T, TransformError>
    where
        F: FnOnce() -> Result<T, TransformError> + Send + 'static,
        T: Send + 'static,
    {
        let held = self.clone();
        tokio::task::spawn_blocking(move || {
            let result = work();
            drop(held);
            result
        })
        .await
        .map_err(|e| TransformError::failed(format!("blocking worker failed: {}", e), None))?
    }
}

/// Result of a successful transformation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformOutput {
    pub output_path: PathBuf,
    pub output_size: u64,
    pub output_format: String,
    /// Wall time of the invocation in milliseconds.
    pub duration_ms: u64,
}

/// Progress update during a transformation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformProgress {
    pub job_id: String,
    /// Progress percentage (0.0 - 100.0).
    pub percent: f32,
    /// Media time processed so far, in seconds.
    pub time_secs: f64,
    /// Current processing speed (e.g., "1.5x").
    pub speed: Option<String>,
}

/// Channel transformers report progress on.
pub type ProgressSender = mpsc::Sender<TransformProgress>;

/// Duration and stream facts gathered with ffprobe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_secs: f64,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.1}s", self.format, self.duration_secs)?;
        if let Some(codec) = &self.video_codec {
            write!(f, ", video {}", codec)?;
            if let (Some(w), Some(h)) = (self.width, self.height) {
                write!(f, " {}x{}", w, h)?;
            }
        }
        if let Some(codec) = &self.audio_codec {
            write!(f, ", audio {}", codec)?;
        }
        Ok(())
    }
}

impl TransformOutput {
    /// Builds the result for a file the transformer just wrote.
    pub(crate) async fn from_written(
        path: &std::path::Path,
        format: &str,
        started: std::time::Instant,
    ) -> Result<Self, super::error::TransformError> {
        let meta = tokio::fs::metadata(path).await.map_err(|_| {
            super::error::TransformError::failed("Output file not created", None)
        })?;
        Ok(Self {
            output_path: path.to_path_buf(),
            output_size: meta.len(),
            output_format: format.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[tokio::test]
    async fn test_slot_stays_taken_until_blocking_work_ends() {
        let semaphore = Arc::new(Semaphore::new(1));
        let permit = Arc::clone(&semaphore).acquire_owned().await.unwrap();
        let mut slot = WorkerSlot::new(permit);

        let work = slot.run_blocking(|| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(20), work).await;
        assert!(timed_out.is_err());

        slot.release();
        assert_eq!(semaphore.available_permits(), 0);

        let freed = tokio::time::timeout(Duration::from_secs(5), semaphore.acquire()).await;
        assert!(freed.is_ok());
    }

    #[tokio::test]
    async fn test_detached_slot_runs_work() {
        let value = WorkerSlot::detached().run_blocking(|| Ok(7)).await.unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_media_info_display_without_streams() {
        let info = MediaInfo {
            duration_secs: 3.0,
            format: "wav".to_string(),
            ..MediaInfo::default()
        };
        assert_eq!(info.to_string(), "wav 3.0s");
    }
}
