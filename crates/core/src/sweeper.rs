//! Background deletion of expired artifacts and their records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::lifecycle::Lifecycle;
use crate::metrics::counters::{SWEEPER_ARTIFACT_ERRORS, SWEEPER_DELETIONS};
use crate::store::StoreError;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Records found past their expiry.
    pub expired: usize,
    /// Records deleted.
    pub deleted: usize,
    /// Artifacts that could not be removed. Their records are deleted anyway.
    pub artifact_errors: usize,
}

/// Deletes everything whose retention window has elapsed.
///
/// Only records with an `expires_at` at or before the sweep time are
/// touched, so sweeping concurrently with new submissions is safe.
#[derive(Clone)]
pub struct CleanupSweeper {
    lifecycle: Arc<Lifecycle>,
    interval: Duration,
}

impl CleanupSweeper {
    pub fn new(lifecycle: Arc<Lifecycle>, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Deletes every record expired at `now`, artifact first.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let expired = self.lifecycle.list_expired(now)?;
        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };

        for record in expired {
            if let Err(e) = self.lifecycle.remove_artifact(&record).await {
                warn!("Failed to remove artifact for expired job {}: {}", record.id, e);
                SWEEPER_ARTIFACT_ERRORS.inc();
                report.artifact_errors += 1;
            }

            match self.lifecycle.jobs().delete(&record.id) {
                Ok(true) => {
                    debug!("Swept expired job {}", record.id);
                    report.deleted += 1;
                }
                // Deleted concurrently.
                Ok(false) => {}
                Err(e) => error!("Failed to delete expired job {}: {}", record.id, e),
            }
        }

        SWEEPER_DELETIONS.inc_by(report.deleted as u64);
        if report.expired > 0 {
            info!(
                "Cleanup sweep removed {} of {} expired jobs ({} artifact errors)",
                report.deleted, report.expired, report.artifact_errors
            );
        }
        Ok(report)
    }

    /// Sweeps on every tick until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        info!("Cleanup sweeper started (interval {}s)", self.interval.as_secs());
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Cleanup sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!("Cleanup sweep failed: {}", e);
                    }
                }
            }
        }
        info!("Cleanup sweeper stopped");
    }

    /// Runs the sweeper on its own task.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(self.run(shutdown_rx));
        SweeperHandle { shutdown_tx, task }
    }
}

/// Handle to a spawned sweeper.
pub struct SweeperHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the loop to stop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!("Cleanup sweeper task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FormatFamily;
    use crate::job::{JobRecord, NewJob, Operation};
    use crate::metrics::SizeMetrics;
    use crate::store::{ArtifactStore, FsArtifactStore, JobStore, SqliteJobStore};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn new_job(name: &str) -> NewJob {
        NewJob {
            original_name: name.to_string(),
            original_size: 100,
            mime_type: "image/png".to_string(),
            declared_mime_type: None,
            family: FormatFamily::Image,
            source_format: "png".to_string(),
            operation: Operation::Compress,
            target_format: None,
            options: serde_json::json!({}),
        }
    }

    async fn completed(lifecycle: &Lifecycle, name: &str) -> JobRecord {
        let record = lifecycle.jobs().create(new_job(name)).unwrap();
        let record = lifecycle.jobs().mark_running(&record.id).unwrap();
        lifecycle
            .complete(&record, b"output", SizeMetrics::compute(100, 6))
            .await
            .unwrap()
    }

    fn lifecycle_with(artifacts: Arc<dyn ArtifactStore>) -> Arc<Lifecycle> {
        let jobs: Arc<dyn JobStore> = Arc::new(SqliteJobStore::in_memory().unwrap());
        Arc::new(Lifecycle::new(jobs, artifacts, chrono::Duration::hours(24)))
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired() {
        let dir = TempDir::new().unwrap();
        let lifecycle = lifecycle_with(Arc::new(FsArtifactStore::new(dir.path()).unwrap()));
        let done = completed(&lifecycle, "a.png").await;
        let pending = lifecycle.jobs().create(new_job("b.png")).unwrap();

        let sweeper = CleanupSweeper::new(lifecycle.clone(), Duration::from_secs(3600));

        // Nothing has expired yet.
        let report = sweeper.sweep(Utc::now()).await.unwrap();
        assert_eq!(report, SweepReport::default());

        let later = Utc::now() + chrono::Duration::hours(25);
        let report = sweeper.sweep(later).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.artifact_errors, 0);

        assert!(lifecycle.jobs().get(&done.id).unwrap().is_none());
        let identity = done.output_identity.unwrap();
        assert!(lifecycle.artifacts().read(&identity).await.unwrap().is_none());
        // Never-completed jobs carry no expiry and are left alone.
        assert!(lifecycle.jobs().get(&pending.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_sweep_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let lifecycle = lifecycle_with(Arc::new(FsArtifactStore::new(dir.path()).unwrap()));
        completed(&lifecycle, "a.png").await;

        let sweeper = CleanupSweeper::new(lifecycle, Duration::from_secs(3600));
        let later = Utc::now() + chrono::Duration::hours(25);
        assert_eq!(sweeper.sweep(later).await.unwrap().deleted, 1);
        assert_eq!(sweeper.sweep(later).await.unwrap(), SweepReport::default());
    }

    /// Writes to disk but refuses to remove anything.
    struct StickyArtifacts(FsArtifactStore);

    #[async_trait]
    impl ArtifactStore for StickyArtifacts {
        async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
            self.0.write(name, bytes).await
        }

        async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.0.read(name).await
        }

        async fn remove(&self, _name: &str) -> Result<bool, StoreError> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only volume",
            )))
        }

        fn path_of(&self, name: &str) -> PathBuf {
            self.0.path_of(name)
        }
    }

    #[tokio::test]
    async fn test_artifact_error_still_deletes_record() {
        let dir = TempDir::new().unwrap();
        let artifacts = StickyArtifacts(FsArtifactStore::new(dir.path()).unwrap());
        let lifecycle = lifecycle_with(Arc::new(artifacts));
        let done = completed(&lifecycle, "a.png").await;

        let sweeper = CleanupSweeper::new(lifecycle.clone(), Duration::from_secs(3600));
        let report = sweeper
            .sweep(Utc::now() + chrono::Duration::hours(25))
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.artifact_errors, 1);
        assert!(lifecycle.jobs().get(&done.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spawned_sweeper_stops() {
        let dir = TempDir::new().unwrap();
        let lifecycle = lifecycle_with(Arc::new(FsArtifactStore::new(dir.path()).unwrap()));
        let handle = CleanupSweeper::new(lifecycle, Duration::from_millis(10)).spawn();
        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("sweeper did not stop");
    }
}
