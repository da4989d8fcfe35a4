//! Transform dispatcher implementation.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use super::config::{EngineConfig, LimitsConfig};
use super::error::EngineError;
use super::types::{Artifact, JobReport, PoolStatus, SubmitRequest};
use crate::detect::{self, extension_for_format, mime_for_format, normalize_format_name};
use crate::job::{CallerTier, JobRecord, JobStatus, NewJob, Operation};
use crate::lifecycle::Lifecycle;
use crate::metrics::counters::{
    BYTES_SAVED, JOBS_COMPLETED, JOBS_FAILED, JOBS_SUBMITTED, SUBMISSIONS_REJECTED,
    TRANSFORM_DURATION,
};
use crate::metrics::SizeMetrics;
use crate::store::{JobFilter, StoreError};
use crate::sweeper::CleanupSweeper;
use crate::transform::{
    TransformError, TransformJob, TransformOptions, TransformOutput, TransformProgress,
    Transformer, TransformerRegistry, WorkerSlot,
};

/// Tracks statistics for the worker pool.
struct PoolStats {
    active: AtomicU64,
    queued: AtomicU64,
    total_processed: AtomicU64,
    total_failed: AtomicU64,
}

impl Default for PoolStats {
    fn default() -> Self {
        Self {
            active: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            total_processed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }
}

impl PoolStats {
    fn to_status(&self, running: bool, max_concurrent: usize) -> PoolStatus {
        PoolStatus {
            running,
            active_jobs: self.active.load(Ordering::Relaxed) as usize,
            max_concurrent,
            queued_jobs: self.queued.load(Ordering::Relaxed) as usize,
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }
}

/// State of a job the engine has accepted but not yet finished.
struct ActiveJob {
    /// Set once the job holds a worker permit; it can no longer be cancelled.
    started: bool,
    cancelled: bool,
    progress: f32,
    /// Receives the terminal record.
    done: watch::Receiver<Option<JobRecord>>,
}

type ActiveJobs = Arc<RwLock<HashMap<String, ActiveJob>>>;

/// A submission that passed validation.
struct Accepted {
    new_job: NewJob,
    transformer: Arc<dyn Transformer>,
    options: TransformOptions,
}

/// Accepts uploads, runs them through the registered transformers on a
/// bounded worker pool, and hands results to the lifecycle store.
pub struct TransformEngine {
    config: EngineConfig,
    limits: LimitsConfig,
    registry: TransformerRegistry,
    lifecycle: Arc<Lifecycle>,
    work_dir: PathBuf,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
    active_jobs: ActiveJobs,
    running: Arc<RwLock<bool>>,
}

impl TransformEngine {
    /// Creates a stopped engine. Uploads are staged under `work_dir`.
    pub fn new(
        config: EngineConfig,
        limits: LimitsConfig,
        registry: TransformerRegistry,
        lifecycle: Arc<Lifecycle>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs.max(1)));
        Self {
            config,
            limits,
            registry,
            lifecycle,
            work_dir: work_dir.into(),
            semaphore,
            stats: Arc::new(PoolStats::default()),
            active_jobs: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    pub fn registry(&self) -> &TransformerRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Starts accepting submissions.
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        *running = true;
        info!("Transform engine started with {} workers", self.config.max_parallel_jobs);
    }

    /// Stops accepting submissions. Jobs already accepted still finish.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Transform engine stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn pool_status(&self) -> PoolStatus {
        let running = *self.running.read().await;
        self.stats.to_status(running, self.config.max_parallel_jobs)
    }

    /// Validates and accepts an upload, returning the Pending record.
    ///
    /// Every rejection happens before a record, work file or worker exists.
    /// The transformation itself runs in the background.
    pub async fn submit(&self, request: SubmitRequest) -> Result<JobRecord, EngineError> {
        if !*self.running.read().await {
            return Err(EngineError::NotRunning);
        }

        let Accepted {
            new_job,
            transformer,
            options,
        } = self.accept(&request).map_err(|e| {
            SUBMISSIONS_REJECTED
                .with_label_values(&[e.rejection_reason()])
                .inc();
            debug!("Rejected upload {}: {}", request.original_name, e);
            e
        })?;

        let record = self.lifecycle.jobs().create(new_job)?;
        JOBS_SUBMITTED
            .with_label_values(&[record.family.as_str(), record.operation.as_str()])
            .inc();
        info!(
            "Accepted job {}: {} {} ({}, {} bytes)",
            record.id, record.operation, record.original_name, record.source_format, record.original_size
        );

        let job_dir = self.work_dir.join(&record.id);
        let input_path = job_dir.join(format!("input.{}", extension_for_format(&record.source_format)));
        if let Err(e) = stage_input(&job_dir, &input_path, &request.bytes).await {
            error!("Failed to stage upload for job {}: {}", record.id, e);
            remove_job_dir(&job_dir).await;
            self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
            JOBS_FAILED
                .with_label_values(&[record.family.as_str(), "io"])
                .inc();
            let failed = self
                .lifecycle
                .jobs()
                .fail(&record.id, &format!("Failed to stage upload: {}", e))?;
            return Ok(failed);
        }

        let (done_tx, done_rx) = watch::channel(None);
        self.active_jobs.write().await.insert(
            record.id.clone(),
            ActiveJob {
                started: false,
                cancelled: false,
                progress: 0.0,
                done: done_rx,
            },
        );

        let job = TransformJob {
            job_id: record.id.clone(),
            output_path: job_dir.join(format!("output.{}", extension_for_format(record.output_format()))),
            input_path,
            source_format: record.source_format.clone(),
            options,
            slot: WorkerSlot::detached(),
        };
        let worker = JobWorker {
            lifecycle: Arc::clone(&self.lifecycle),
            semaphore: Arc::clone(&self.semaphore),
            stats: Arc::clone(&self.stats),
            active_jobs: Arc::clone(&self.active_jobs),
            timeout: self.config.job_timeout(),
        };
        tokio::spawn(worker.run(record.clone(), transformer, job, job_dir, done_tx));

        Ok(record)
    }

    /// Submits and blocks until the job is terminal or the wait timeout elapses.
    pub async fn submit_and_wait(&self, request: SubmitRequest) -> Result<JobRecord, EngineError> {
        let record = self.submit(request).await?;
        self.wait(&record.id, self.config.wait_timeout()).await
    }

    /// Waits up to `timeout` for a job to finish and returns its record.
    ///
    /// On timeout the current, still unfinished, record is returned.
    pub async fn wait(&self, job_id: &str, timeout: Duration) -> Result<JobRecord, EngineError> {
        let receiver = self
            .active_jobs
            .read()
            .await
            .get(job_id)
            .map(|state| state.done.clone());

        if let Some(mut rx) = receiver {
            let finished = match tokio::time::timeout(timeout, rx.wait_for(|r| r.is_some())).await {
                Ok(Ok(record)) => (*record).clone(),
                // The job ended without a record (cancelled or store failure).
                Ok(Err(_)) => None,
                Err(_) => {
                    debug!("Timed out waiting for job {}", job_id);
                    None
                }
            };
            if let Some(record) = finished {
                return Ok(record);
            }
        }

        self.lifecycle
            .jobs()
            .get(job_id)?
            .ok_or_else(|| EngineError::NotFound(job_id.to_string()))
    }

    /// The job record plus live progress.
    pub async fn status(&self, job_id: &str) -> Result<JobReport, EngineError> {
        let record = self
            .lifecycle
            .jobs()
            .get(job_id)?
            .ok_or_else(|| EngineError::NotFound(job_id.to_string()))?;
        let progress = self
            .active_jobs
            .read()
            .await
            .get(job_id)
            .map(|state| state.progress);
        Ok(JobReport::new(record, progress))
    }

    /// Job records, newest first.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, EngineError> {
        Ok(self.lifecycle.jobs().list(filter)?)
    }

    /// Number of records matching the filter's status, ignoring paging.
    pub fn count_jobs(&self, filter: &JobFilter) -> Result<i64, EngineError> {
        Ok(self.lifecycle.jobs().count(filter)?)
    }

    /// The artifact stored under `identity`, if it may still be served.
    pub async fn download(&self, identity: &str, tier: CallerTier) -> Result<Artifact, EngineError> {
        let record = self.lifecycle.resolve(identity, Utc::now())?;
        let size = record.output_size.unwrap_or(0);
        if !self.limits.may_download(tier, size) {
            return Err(EngineError::SignupRequired {
                size,
                limit: self.limits.anonymous_download_limit_bytes,
            });
        }

        let bytes = self.lifecycle.read(&record).await?;
        Ok(Artifact {
            size: bytes.len() as u64,
            file_name: identity.to_string(),
            mime: mime_for_format(record.output_format()).to_string(),
            bytes,
        })
    }

    /// Discards a job that has not started yet.
    pub async fn cancel(&self, job_id: &str) -> Result<(), EngineError> {
        {
            let mut jobs = self.active_jobs.write().await;
            match jobs.get_mut(job_id) {
                Some(state) if state.started => {
                    return Err(EngineError::InvalidState(format!(
                        "Job {} has already started",
                        job_id
                    )));
                }
                Some(state) => state.cancelled = true,
                None => {
                    return match self.lifecycle.jobs().get(job_id)? {
                        Some(record) => Err(EngineError::InvalidState(format!(
                            "Job {} is {}",
                            job_id, record.status
                        ))),
                        None => Err(EngineError::NotFound(job_id.to_string())),
                    };
                }
            }
        }

        self.lifecycle.jobs().delete(job_id)?;
        info!("Cancelled queued job {}", job_id);
        Ok(())
    }

    /// Deletes a job and its artifact. Running jobs cannot be deleted.
    pub async fn delete(&self, job_id: &str) -> Result<(), EngineError> {
        let record = self
            .lifecycle
            .jobs()
            .get(job_id)?
            .ok_or_else(|| EngineError::NotFound(job_id.to_string()))?;

        match record.status {
            JobStatus::Pending => self.cancel(job_id).await,
            JobStatus::Running => Err(EngineError::InvalidState(format!(
                "Job {} is running",
                job_id
            ))),
            JobStatus::Completed | JobStatus::Failed => {
                self.lifecycle.delete(job_id).await?;
                Ok(())
            }
        }
    }

    /// Runs a cleanup sweep now and returns how many jobs were deleted.
    pub async fn trigger_cleanup(&self) -> Result<usize, EngineError> {
        let sweeper = CleanupSweeper::new(Arc::clone(&self.lifecycle), self.config.sweep_interval());
        let report = sweeper.sweep(Utc::now()).await?;
        Ok(report.deleted)
    }

    /// Settles records left behind by a previous process.
    ///
    /// Pending and Running jobs this engine does not own are failed and their
    /// work directories removed; Completed records missing an expiry get one.
    /// Returns the number of jobs failed.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let jobs = self.lifecycle.jobs();
        let owned: Vec<String> = self.active_jobs.read().await.keys().cloned().collect();

        let mut orphaned = Vec::new();
        for status in [JobStatus::Pending, JobStatus::Running] {
            let filter = JobFilter::new().with_status(status).with_limit(i64::MAX);
            orphaned.extend(
                jobs.list(&filter)?
                    .into_iter()
                    .filter(|record| !owned.contains(&record.id)),
            );
        }

        for record in &orphaned {
            warn!("Failing job {} interrupted while {}", record.id, record.status);
            jobs.fail(&record.id, "Interrupted by a restart before finishing")?;
            remove_job_dir(&self.work_dir.join(&record.id)).await;
        }

        let completed = JobFilter::new()
            .with_status(JobStatus::Completed)
            .with_limit(i64::MAX);
        for record in jobs.list(&completed)? {
            if record.expires_at.is_none() {
                warn!("Completed job {} had no expiry, setting it now", record.id);
                self.lifecycle.mark_expiry(&record.id, self.lifecycle.retention())?;
            }
        }

        if !orphaned.is_empty() {
            info!("Recovered {} interrupted jobs", orphaned.len());
        }
        Ok(orphaned.len())
    }

    /// Runs the pre-flight checks. Nothing is allocated here.
    fn accept(&self, request: &SubmitRequest) -> Result<Accepted, EngineError> {
        let size = request.bytes.len() as u64;
        if size == 0 {
            return Err(EngineError::validation("Uploaded file is empty"));
        }

        let max = self.limits.max_upload_for(request.tier);
        if size > max {
            return Err(EngineError::validation(format!(
                "File is {} bytes; {} callers may upload at most {} bytes",
                size, request.tier, max
            )));
        }

        let name = match request.original_name.trim() {
            "" => "upload",
            name => name,
        };
        let detected = detect::detect(&request.bytes, request.declared_mime_type.as_deref(), name)
            .ok_or_else(|| {
                EngineError::UnsupportedFormat(format!("{} is not a recognized file type", name))
            })?;

        if !self.registry.supports_family(detected.family) {
            return Err(EngineError::UnsupportedFormat(format!(
                "No transformer handles {} files",
                detected.family
            )));
        }
        let transformer = self
            .registry
            .get(detected.family)
            .filter(|t| t.supports_input(&detected.format))
            .ok_or_else(|| {
                EngineError::UnsupportedFormat(format!(
                    "No transformer accepts {} {} input",
                    detected.format, detected.family
                ))
            })?;

        let target_format = match (request.operation, request.target_format.as_deref()) {
            (Operation::Convert, Some(target)) if !target.trim().is_empty() => {
                let target = normalize_format_name(target);
                if !self.registry.supports_target(detected.family, &target) {
                    return Err(EngineError::UnsupportedTargetFormat {
                        family: detected.family,
                        target,
                    });
                }
                Some(target)
            }
            (Operation::Convert, _) => {
                return Err(EngineError::validation("target_format is required for convert"));
            }
            (Operation::Compress, Some(target)) if !target.trim().is_empty() => {
                return Err(EngineError::validation("target_format only applies to convert"));
            }
            (Operation::Compress, _) => None,
        };

        let options = transformer
            .parse_options(request.operation, &request.options)
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        Ok(Accepted {
            new_job: NewJob {
                original_name: name.to_string(),
                original_size: size,
                mime_type: detected.mime,
                declared_mime_type: request.declared_mime_type.clone(),
                family: detected.family,
                source_format: detected.format,
                operation: request.operation,
                target_format,
                options: options.to_json(),
            },
            transformer,
            options,
        })
    }
}

/// Everything a spawned job needs from the engine.
struct JobWorker {
    lifecycle: Arc<Lifecycle>,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
    active_jobs: ActiveJobs,
    timeout: Duration,
}

impl JobWorker {
    async fn run(
        self,
        record: JobRecord,
        transformer: Arc<dyn Transformer>,
        mut job: TransformJob,
        job_dir: PathBuf,
        done_tx: watch::Sender<Option<JobRecord>>,
    ) {
        let outcome = self.execute(&record, transformer, &mut job).await;
        // Blocking work that outlived a timeout keeps its own share of the slot.
        job.slot.release();
        remove_job_dir(&job_dir).await;

        // Publish before forgetting the job so waiters never miss the result.
        if let Some(finished) = outcome {
            done_tx.send_replace(Some(finished));
        }
        self.active_jobs.write().await.remove(&record.id);
    }

    /// Returns the terminal record, or None if the job was discarded.
    async fn execute(
        &self,
        record: &JobRecord,
        transformer: Arc<dyn Transformer>,
        job: &mut TransformJob,
    ) -> Option<JobRecord> {
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        let permit = Arc::clone(&self.semaphore).acquire_owned().await;
        self.stats.queued.fetch_sub(1, Ordering::Relaxed);
        job.slot = match permit {
            Ok(permit) => WorkerSlot::new(permit),
            Err(_) => return self.fail(record, "Worker pool is closed", "pool"),
        };
        let job = &*job;

        {
            let mut jobs = self.active_jobs.write().await;
            match jobs.get_mut(&record.id) {
                Some(state) if !state.cancelled => state.started = true,
                _ => {
                    info!("Job {} was cancelled while queued", record.id);
                    return None;
                }
            }
        }

        let running = match self.lifecycle.jobs().mark_running(&record.id) {
            Ok(running) => running,
            Err(StoreError::NotFound(_)) => {
                info!("Job {} was discarded while queued", record.id);
                return None;
            }
            Err(e) => {
                error!("Failed to start job {}: {}", record.id, e);
                return self.fail(record, &format!("Failed to start: {}", e), "store");
            }
        };
        info!("Job {} running on {}", running.id, transformer.name());

        self.stats.active.fetch_add(1, Ordering::Relaxed);
        let (progress_tx, progress_rx) = mpsc::channel(32);
        tokio::spawn(track_progress(
            Arc::clone(&self.active_jobs),
            running.id.clone(),
            progress_rx,
        ));

        let started = Instant::now();
        let invocation = async {
            match (running.operation, running.target_format.as_deref()) {
                (Operation::Convert, Some(target)) => {
                    transformer.convert(job, target, Some(progress_tx)).await
                }
                _ => transformer.compress(job, Some(progress_tx)).await,
            }
        };
        // Dropping the invocation on timeout kills any external tool it spawned.
        // Blocking work cannot be stopped and holds the slot until it returns.
        let result = match tokio::time::timeout(self.timeout, invocation).await {
            Ok(result) => result,
            Err(_) => Err(TransformError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }),
        };
        TRANSFORM_DURATION
            .with_label_values(&[running.family.as_str(), running.operation.as_str()])
            .observe(started.elapsed().as_secs_f64());
        self.stats.active.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(output) => self.finish(&running, &output).await,
            Err(e) => self.fail(&running, &e.to_string(), e.kind()),
        }
    }

    async fn finish(&self, record: &JobRecord, output: &TransformOutput) -> Option<JobRecord> {
        let bytes = match tokio::fs::read(&output.output_path).await {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(record, &format!("Failed to read output: {}", e), "io"),
        };

        let metrics = SizeMetrics::compute(record.original_size, bytes.len() as u64);
        match self.lifecycle.complete(record, &bytes, metrics).await {
            Ok(completed) => {
                self.stats.total_processed.fetch_add(1, Ordering::Relaxed);
                JOBS_COMPLETED
                    .with_label_values(&[record.family.as_str()])
                    .inc();
                if metrics.shrank() {
                    BYTES_SAVED
                        .with_label_values(&[record.family.as_str()])
                        .inc_by(metrics.bytes_saved as u64);
                }
                info!(
                    "Job {} completed in {} ms: {} -> {} bytes ({}%)",
                    record.id,
                    output.duration_ms,
                    metrics.original_size,
                    metrics.output_size,
                    metrics.ratio_percent
                );
                Some(completed)
            }
            Err(e) => {
                error!("Failed to store output of job {}: {}", record.id, e);
                self.fail(record, &format!("Failed to store output: {}", e), "store")
            }
        }
    }

    fn fail(&self, record: &JobRecord, cause: &str, reason: &str) -> Option<JobRecord> {
        self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
        JOBS_FAILED
            .with_label_values(&[record.family.as_str(), reason])
            .inc();

        match self.lifecycle.jobs().fail(&record.id, cause) {
            Ok(failed) => {
                warn!("Job {} failed: {}", record.id, cause);
                Some(failed)
            }
            Err(e) => {
                error!("Failed to record failure of job {}: {}", record.id, e);
                None
            }
        }
    }
}

/// Copies transformer progress into the job's live state.
async fn track_progress(
    active_jobs: ActiveJobs,
    job_id: String,
    mut rx: mpsc::Receiver<TransformProgress>,
) {
    while let Some(update) = rx.recv().await {
        if let Some(state) = active_jobs.write().await.get_mut(&job_id) {
            state.progress = update.percent.clamp(0.0, 100.0);
        }
    }
}

async fn stage_input(job_dir: &Path, input_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(job_dir).await?;
    tokio::fs::write(input_path, bytes).await
}

async fn remove_job_dir(job_dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(job_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove work directory {}: {}", job_dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FormatFamily;
    use crate::store::{FsArtifactStore, JobStore, SqliteJobStore};
    use crate::testing::{fixtures, MockTransformer};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        engine: TransformEngine,
        mock: MockTransformer,
    }

    async fn harness(config: EngineConfig, limits: LimitsConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let jobs: Arc<dyn JobStore> = Arc::new(SqliteJobStore::in_memory().unwrap());
        let artifacts = Arc::new(FsArtifactStore::new(dir.path().join("artifacts")).unwrap());
        let lifecycle = Arc::new(Lifecycle::new(jobs, artifacts, config.retention()));

        let mock = MockTransformer::new(FormatFamily::Image);
        let mut registry = TransformerRegistry::new();
        registry.register(Arc::new(mock.clone()));

        let engine = TransformEngine::new(config, limits, registry, lifecycle, dir.path().join("work"));
        engine.start().await;
        Harness {
            _dir: dir,
            engine,
            mock,
        }
    }

    async fn default_harness() -> Harness {
        harness(EngineConfig::default(), LimitsConfig::default()).await
    }

    #[tokio::test]
    async fn test_submit_returns_pending_and_completes() {
        let h = default_harness().await;
        let record = h
            .engine
            .submit(SubmitRequest::compress(fixtures::png_bytes(), "photo.png"))
            .await
            .unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.family, FormatFamily::Image);
        assert_eq!(record.options["quality"], 80);

        let done = h.engine.wait(&record.id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.output_identity.is_some());
        assert!(done.expires_at.is_some());
        assert!(done.error.is_none());
        assert_eq!(h.mock.transform_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let h = default_harness().await;
        let err = h
            .engine
            .submit(SubmitRequest::compress(Vec::new(), "empty.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(h.engine.list_jobs(&JobFilter::new()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_count_jobs_ignores_paging() {
        let h = default_harness().await;
        for name in ["a.png", "b.png", "c.png"] {
            h.engine
                .submit_and_wait(SubmitRequest::compress(fixtures::png_bytes(), name))
                .await
                .unwrap();
        }

        let page = JobFilter::new().with_limit(1);
        assert_eq!(h.engine.list_jobs(&page).unwrap().len(), 1);
        assert_eq!(h.engine.count_jobs(&page).unwrap(), 3);
        assert_eq!(
            h.engine
                .count_jobs(&JobFilter::new().with_status(JobStatus::Failed))
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_tier_upload_limit() {
        let limits = LimitsConfig::default().with_upload_limit(CallerTier::Anonymous, 16);
        let h = harness(EngineConfig::default(), limits).await;

        let err = h
            .engine
            .submit(SubmitRequest::compress(fixtures::png_bytes(), "a.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let accepted = h
            .engine
            .submit(SubmitRequest::compress(fixtures::png_bytes(), "a.png").with_tier(CallerTier::Premium))
            .await;
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_content_rejected() {
        let h = default_harness().await;
        let err = h
            .engine
            .submit(SubmitRequest::compress(b"just text".to_vec(), "photo.png").with_declared_mime("image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_heif_still_rejected_without_record() {
        let h = default_harness().await;
        let mut heic = vec![0x00, 0x00, 0x00, 0x18];
        heic.extend_from_slice(b"ftypheic");
        heic.extend_from_slice(&[0u8; 64]);

        let err = h
            .engine
            .submit(SubmitRequest::compress(heic, "photo.heic"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
        assert!(h.engine.list_jobs(&JobFilter::new()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_family_without_transformer_rejected() {
        let h = default_harness().await;
        let err = h
            .engine
            .submit(SubmitRequest::compress(fixtures::pdf_bytes(), "doc.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_convert_requires_supported_target() {
        let h = default_harness().await;

        let err = h
            .engine
            .submit(SubmitRequest {
                target_format: None,
                ..SubmitRequest::convert(fixtures::png_bytes(), "a.png", "webp")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = h
            .engine
            .submit(SubmitRequest::convert(fixtures::png_bytes(), "a.png", "mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedTargetFormat { .. }));
        assert!(h.engine.list_jobs(&JobFilter::new()).unwrap().is_empty());
        assert_eq!(h.mock.transform_count().await, 0);
    }

    #[tokio::test]
    async fn test_convert_target_is_normalized() {
        let h = default_harness().await;
        let record = h
            .engine
            .submit(SubmitRequest::convert(fixtures::png_bytes(), "a.png", "JPG"))
            .await
            .unwrap();
        assert_eq!(record.target_format.as_deref(), Some("jpeg"));
        assert_eq!(record.options["quality"], 90);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let h = default_harness().await;
        let err = h
            .engine
            .submit(
                SubmitRequest::compress(fixtures::png_bytes(), "a.png")
                    .with_options(serde_json::json!({"quality": 0})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = h
            .engine
            .submit(
                SubmitRequest::compress(fixtures::png_bytes(), "a.png")
                    .with_options(serde_json::json!({"sharpen": true})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_transform_failure_recorded_on_job() {
        let h = default_harness().await;
        h.mock
            .set_next_error(TransformError::failed("encoder crashed", None))
            .await;

        let record = h
            .engine
            .submit_and_wait(SubmitRequest::compress(fixtures::png_bytes(), "a.png"))
            .await
            .unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().contains("encoder crashed"));
        assert!(record.output_identity.is_none());
        assert!(record.expires_at.is_none());

        let status = h.engine.pool_status().await;
        assert_eq!(status.total_failed, 1);
    }

    #[tokio::test]
    async fn test_timeout_fails_job() {
        let h = harness(EngineConfig::default().with_job_timeout(1), LimitsConfig::default()).await;
        h.mock.set_delay(Duration::from_secs(5)).await;

        let record = h
            .engine
            .submit_and_wait(SubmitRequest::compress(fixtures::png_bytes(), "a.png"))
            .await
            .unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timed_out_blocking_work_keeps_worker_slot() {
        let config = EngineConfig::default()
            .with_max_parallel_jobs(1)
            .with_job_timeout(1);
        let h = harness(config, LimitsConfig::default()).await;
        h.mock.set_blocking_delay(Duration::from_secs(3)).await;

        let record = h
            .engine
            .submit_and_wait(SubmitRequest::compress(fixtures::png_bytes(), "a.png"))
            .await
            .unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(h.engine.semaphore.available_permits(), 0);

        let freed = tokio::time::timeout(Duration::from_secs(10), h.engine.semaphore.acquire()).await;
        assert!(freed.is_ok());
    }

    #[tokio::test]
    async fn test_work_dir_removed_after_job() {
        let h = default_harness().await;
        let record = h
            .engine
            .submit_and_wait(SubmitRequest::compress(fixtures::png_bytes(), "a.png"))
            .await
            .unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(!h.engine.work_dir.join(&record.id).exists());
    }

    #[tokio::test]
    async fn test_download_and_signup_threshold() {
        let limits = LimitsConfig::default().with_anonymous_download_limit(1);
        let h = harness(EngineConfig::default(), limits).await;
        let record = h
            .engine
            .submit_and_wait(SubmitRequest::compress(fixtures::png_bytes(), "a.png"))
            .await
            .unwrap();
        let identity = record.output_identity.unwrap();

        let err = h.engine.download(&identity, CallerTier::Anonymous).await.unwrap_err();
        assert!(matches!(err, EngineError::SignupRequired { .. }));

        let artifact = h.engine.download(&identity, CallerTier::Registered).await.unwrap();
        assert_eq!(artifact.mime, "image/png");
        assert_eq!(artifact.size, record.output_size.unwrap());
        assert_eq!(artifact.file_name, identity);
    }

    #[tokio::test]
    async fn test_download_unknown_identity() {
        let h = default_harness().await;
        let err = h
            .engine
            .download("missing_compress_1_deadbeef.png", CallerTier::Premium)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let h = harness(EngineConfig::default().with_max_parallel_jobs(1), LimitsConfig::default()).await;
        h.mock.set_delay(Duration::from_millis(300)).await;

        let first = h
            .engine
            .submit(SubmitRequest::compress(fixtures::png_bytes(), "first.png"))
            .await
            .unwrap();
        let second = h
            .engine
            .submit(SubmitRequest::compress(fixtures::png_bytes(), "second.png"))
            .await
            .unwrap();

        // Let the first job take the only worker.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = h.engine.cancel(&first.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        h.engine.cancel(&second.id).await.unwrap();
        assert!(matches!(
            h.engine.status(&second.id).await,
            Err(EngineError::NotFound(_))
        ));

        let first = h.engine.wait(&first.id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(first.status, JobStatus::Completed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.mock.transform_count().await, 1);
        assert!(!h.engine.work_dir.join(&second.id).exists());
    }

    #[tokio::test]
    async fn test_cancel_finished_job_is_invalid() {
        let h = default_harness().await;
        let record = h
            .engine
            .submit_and_wait(SubmitRequest::compress(fixtures::png_bytes(), "a.png"))
            .await
            .unwrap();
        assert!(matches!(
            h.engine.cancel(&record.id).await,
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            h.engine.cancel("nope").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_completed_job() {
        let h = default_harness().await;
        let record = h
            .engine
            .submit_and_wait(SubmitRequest::compress(fixtures::png_bytes(), "a.png"))
            .await
            .unwrap();
        let identity = record.output_identity.clone().unwrap();

        h.engine.delete(&record.id).await.unwrap();
        assert!(matches!(
            h.engine.download(&identity, CallerTier::Premium).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            h.engine.delete(&record.id).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_not_running_rejects_submissions() {
        let h = default_harness().await;
        h.engine.stop().await;
        assert!(!h.engine.pool_status().await.running);

        let err = h
            .engine
            .submit(SubmitRequest::compress(fixtures::png_bytes(), "a.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotRunning));
    }

    #[tokio::test]
    async fn test_status_reports_progress() {
        let h = default_harness().await;
        let record = h
            .engine
            .submit_and_wait(SubmitRequest::compress(fixtures::png_bytes(), "a.png"))
            .await
            .unwrap();
        let report = h.engine.status(&record.id).await.unwrap();
        assert_eq!(report.record.status, JobStatus::Completed);
        assert_eq!(report.progress_percent, Some(100.0));
    }

    #[tokio::test]
    async fn test_recover_fails_orphaned_jobs() {
        let h = default_harness().await;
        let orphan = h
            .engine
            .lifecycle()
            .jobs()
            .create(NewJob {
                original_name: "left-over.png".to_string(),
                original_size: 10,
                mime_type: "image/png".to_string(),
                declared_mime_type: None,
                family: FormatFamily::Image,
                source_format: "png".to_string(),
                operation: Operation::Compress,
                target_format: None,
                options: serde_json::json!({}),
            })
            .unwrap();

        assert_eq!(h.engine.recover().await.unwrap(), 1);
        let record = h.engine.lifecycle().jobs().get(&orphan.id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.is_some());

        assert_eq!(h.engine.recover().await.unwrap(), 0);
    }
}
