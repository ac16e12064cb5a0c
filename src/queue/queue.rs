//! Queue admission, execution, and retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{event, NotificationBus, NullBus};
use crate::executor::{ExecutionError, JobExecutor};
use crate::generator::GenerationParams;
use crate::queue::events::{outcome_channel, JobOutcome, OutcomeReceiver, OutcomeSender};
use crate::queue::job::{Job, JobStatus, CANCELLED_MESSAGE};
use crate::store::{InsertOutcome, JobStore, StoreError};

/// Errors surfaced by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The queue has already been started.
    #[error("Queue is already running")]
    AlreadyRunning,

    /// No job exists with the given id.
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    /// The job is past the point where cancellation is supported.
    #[error("Job {id} is {status} and cannot be cancelled")]
    NotCancellable { id: Uuid, status: JobStatus },
}

/// Tunables for queue admission and execution.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of jobs executing at once.
    pub max_concurrent: usize,
    /// Hard wall-clock limit for one execution attempt.
    pub job_timeout: Duration,
    /// Fixed delay before a failed attempt is requeued.
    pub retry_delay: Duration,
    /// How long the admission loop sleeps when the store has no
    /// pending work and no wakeup arrives.
    pub idle_backoff: Duration,
    /// Cadence of time-based progress updates while a job executes.
    pub progress_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            job_timeout: Duration::from_secs(10 * 60),
            retry_delay: Duration::from_secs(5),
            idle_backoff: Duration::from_secs(1),
            progress_interval: Duration::from_secs(2),
        }
    }
}

/// Aggregate queue statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    /// Average processing time of completed jobs, in milliseconds.
    pub average_processing_ms: Option<f64>,
    /// Completed over all terminal jobs, in `[0, 1]`.
    pub success_rate: f64,
}

/// State shared between the queue handle, the admission loop, and
/// worker tasks.
struct QueueCore {
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn JobExecutor>,
    bus: Arc<dyn NotificationBus>,
    wake: Notify,
    slots: Arc<Semaphore>,
    outcomes: OutcomeSender,
    worker_id: String,
}

/// Priority job queue over a durable store.
///
/// Jobs are admitted in priority order (higher first, FIFO within a
/// band), executed with a bounded concurrency, retried with a fixed
/// delay while attempts remain, and reported as [`JobOutcome`]s once
/// terminal.
pub struct JobQueue {
    core: Arc<QueueCore>,
    shutdown: broadcast::Sender<()>,
    admission: Mutex<Option<JoinHandle<()>>>,
    outcomes_rx: std::sync::Mutex<Option<OutcomeReceiver>>,
    running: AtomicBool,
}

impl JobQueue {
    /// Creates a stopped queue over the given store and executor.
    pub fn new(store: Arc<dyn JobStore>, executor: Arc<dyn JobExecutor>, config: QueueConfig) -> Self {
        let (outcomes, outcomes_rx) = outcome_channel();
        let (shutdown, _) = broadcast::channel(1);
        let core = Arc::new(QueueCore {
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
            store,
            executor,
            bus: Arc::new(NullBus),
            wake: Notify::new(),
            outcomes,
            worker_id: format!("queue-{}", Uuid::new_v4()),
        });
        Self {
            core,
            shutdown,
            admission: Mutex::new(None),
            outcomes_rx: std::sync::Mutex::new(Some(outcomes_rx)),
            running: AtomicBool::new(false),
        }
    }

    /// Replaces the notification bus. Only meaningful before `start`.
    pub fn with_bus(mut self, bus: Arc<dyn NotificationBus>) -> Self {
        // The core has no other references yet at construction time.
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.bus = bus;
        }
        self
    }

    /// Takes the terminal-outcome receiver. Yields `Some` exactly once.
    pub fn take_outcomes(&self) -> Option<OutcomeReceiver> {
        self.outcomes_rx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
    }

    /// Returns whether the admission loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of jobs currently executing.
    pub fn active_count(&self) -> usize {
        self.core.config.max_concurrent - self.core.slots.available_permits()
    }

    /// Starts the admission loop.
    pub async fn start(&self) -> Result<(), QueueError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyRunning);
        }

        let core = Arc::clone(&self.core);
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(admission_loop(core, shutdown));
        *self.admission.lock().await = Some(handle);
        info!(
            max_concurrent = self.core.config.max_concurrent,
            worker_id = %self.core.worker_id,
            "Job queue started"
        );
        Ok(())
    }

    /// Stops admission and waits for in-flight jobs to finish.
    ///
    /// Pending jobs stay pending in the store and are picked up by the
    /// next `start`.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(());

        if let Some(handle) = self.admission.lock().await.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Admission loop ended abnormally");
            }
        }

        // Draining every permit means every worker task has returned.
        let max = self.core.config.max_concurrent as u32;
        match self.core.slots.acquire_many(max).await {
            Ok(permits) => drop(permits),
            Err(_) => warn!("Concurrency semaphore closed during shutdown"),
        }
        info!("Job queue stopped");
    }

    /// Enqueues a job for a subject. If an active job already exists
    /// for the subject, that job is returned instead of creating a
    /// duplicate.
    pub async fn create_job(
        &self,
        subject_id: impl Into<String>,
        parameters: GenerationParams,
        priority: i32,
    ) -> Result<Job, QueueError> {
        let job = Job::new(subject_id, parameters, priority);
        match self.core.store.insert_unique(&job).await? {
            InsertOutcome::Inserted => {
                info!(
                    job_id = %job.id,
                    subject_id = %job.subject_id,
                    priority = job.priority,
                    "Job created"
                );
                self.core.bus.publish(
                    event::JOB_CREATED,
                    json!({
                        "job_id": job.id,
                        "subject_id": job.subject_id,
                        "priority": job.priority,
                    }),
                );
                self.core.wake.notify_one();
                Ok(job)
            }
            InsertOutcome::AlreadyActive(existing) => {
                debug!(
                    job_id = %existing.id,
                    subject_id = %existing.subject_id,
                    "Active job already exists for subject"
                );
                Ok(existing)
            }
        }
    }

    /// Enqueues a batch of jobs, one per subject. Items that fail are
    /// logged and skipped; the successfully enqueued (or deduplicated)
    /// jobs are returned.
    pub async fn create_jobs_batch(
        &self,
        items: Vec<(String, GenerationParams, i32)>,
    ) -> Vec<Job> {
        let mut jobs = Vec::with_capacity(items.len());
        for (subject_id, parameters, priority) in items {
            match self.create_job(subject_id.clone(), parameters, priority).await {
                Ok(job) => jobs.push(job),
                Err(err) => {
                    error!(subject_id = %subject_id, error = %err, "Failed to enqueue job");
                }
            }
        }
        jobs
    }

    /// Fetches a job by id.
    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.core.store.get(id).await?)
    }

    /// Cancels a pending job. Processing jobs run to completion and
    /// cannot be cancelled.
    pub async fn cancel_job(&self, id: Uuid) -> Result<Job, QueueError> {
        let job = self
            .core
            .store
            .get(id)
            .await?
            .ok_or(QueueError::JobNotFound(id))?;

        if !self.core.store.cancel_if_pending(id).await? {
            return Err(QueueError::NotCancellable {
                id,
                status: job.status,
            });
        }

        info!(job_id = %id, subject_id = %job.subject_id, "Job cancelled");
        self.core.bus.publish(
            event::JOB_FAILED,
            json!({
                "job_id": id,
                "subject_id": job.subject_id,
                "error": CANCELLED_MESSAGE,
                "cancelled": true,
                "will_retry": false,
            }),
        );
        let _ = self.core.outcomes.send(JobOutcome {
            job_id: id,
            subject_id: job.subject_id.clone(),
            status: JobStatus::Failed,
            error_message: Some(CANCELLED_MESSAGE.to_string()),
            duration_ms: 0,
            attempts: job.attempts,
            quality_score: None,
            finished_at: Utc::now(),
        });

        self.core
            .store
            .get(id)
            .await?
            .ok_or(QueueError::JobNotFound(id))
    }

    /// Returns the 1-based position of a pending job in admission
    /// order, or `None` if the job is no longer pending.
    pub async fn get_queue_position(&self, id: Uuid) -> Result<Option<usize>, QueueError> {
        let job = self
            .core
            .store
            .get(id)
            .await?
            .ok_or(QueueError::JobNotFound(id))?;
        if job.status != JobStatus::Pending {
            return Ok(None);
        }

        let pending = self.core.store.query_pending(u32::MAX).await?;
        Ok(pending.iter().position(|j| j.id == id).map(|i| i + 1))
    }

    /// Returns aggregate queue statistics.
    pub async fn get_queue_stats(&self) -> Result<QueueStats, QueueError> {
        let counts = self.core.store.count_by_status().await?;
        let average_processing_ms = self.core.store.average_processing_ms().await?;
        let terminal = counts.completed + counts.failed;
        let success_rate = if terminal == 0 {
            0.0
        } else {
            counts.completed as f64 / terminal as f64
        };
        Ok(QueueStats {
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            average_processing_ms,
            success_rate,
        })
    }

    /// Returns the full job history for a subject, newest first.
    pub async fn subject_history(&self, subject_id: &str) -> Result<Vec<Job>, QueueError> {
        Ok(self.core.store.jobs_for_subject(subject_id).await?)
    }

    /// Deletes terminal jobs older than the given number of days.
    pub async fn cleanup_old_jobs(&self, older_than_days: u32) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));
        let deleted = self
            .core
            .store
            .delete_older_than(cutoff, &[JobStatus::Completed, JobStatus::Failed])
            .await?;
        if deleted > 0 {
            info!(deleted, older_than_days, "Cleaned up old jobs");
        }
        Ok(deleted)
    }
}

/// Claims pending jobs whenever a concurrency slot is free, spawning
/// one worker task per claim.
async fn admission_loop(core: Arc<QueueCore>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let permit = tokio::select! {
            permit = Arc::clone(&core.slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = shutdown.recv() => return,
        };

        match core.store.claim_next_pending(&core.worker_id).await {
            Ok(Some(job)) => {
                tokio::spawn(run_job(Arc::clone(&core), job, permit));
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = core.wake.notified() => {}
                    _ = tokio::time::sleep(core.config.idle_backoff) => {}
                    _ = shutdown.recv() => return,
                }
            }
            Err(err) => {
                drop(permit);
                warn!(error = %err, "Failed to claim pending job");
                tokio::select! {
                    _ = tokio::time::sleep(core.config.idle_backoff) => {}
                    _ = shutdown.recv() => return,
                }
            }
        }
    }
}

/// Runs one claimed job to a terminal state or back to pending.
async fn run_job(core: Arc<QueueCore>, mut job: Job, permit: OwnedSemaphorePermit) {
    info!(
        job_id = %job.id,
        subject_id = %job.subject_id,
        attempt = job.attempts,
        max_attempts = job.max_attempts,
        "Job started"
    );
    core.bus.publish(
        event::JOB_STARTED,
        json!({
            "job_id": job.id,
            "subject_id": job.subject_id,
            "attempt": job.attempts,
            "worker_id": core.worker_id,
        }),
    );

    let progress = tokio::spawn(progress_loop(Arc::clone(&core), job.clone()));

    let result = tokio::time::timeout(core.config.job_timeout, core.executor.execute(&job)).await;
    progress.abort();

    match result {
        Ok(Ok(report)) => {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.completed_at = Some(Utc::now());
            job.error_message = None;
            let duration_ms = duration_ms(&job);
            if let Err(err) = core.store.update(&job).await {
                error!(job_id = %job.id, error = %err, "Failed to persist completed job");
            }

            info!(
                job_id = %job.id,
                subject_id = %job.subject_id,
                duration_ms,
                score = report.validation.score,
                "Job completed"
            );
            core.bus.publish(
                event::JOB_COMPLETED,
                json!({
                    "job_id": job.id,
                    "subject_id": job.subject_id,
                    "duration_ms": duration_ms,
                    "score": report.validation.score,
                }),
            );
            let _ = core.outcomes.send(JobOutcome {
                job_id: job.id,
                subject_id: job.subject_id.clone(),
                status: JobStatus::Completed,
                error_message: None,
                duration_ms,
                attempts: job.attempts,
                quality_score: Some(report.validation.score),
                finished_at: Utc::now(),
            });
        }
        Ok(Err(err)) => {
            // A gate rejection still evaluated a draft; its score rides
            // the outcome even though the attempt failed.
            let score = match &err {
                ExecutionError::QualityRejected { score, .. } => Some(*score),
                _ => None,
            };
            handle_failure(&core, job, err.to_string(), score).await;
        }
        Err(_) => {
            let message = format!(
                "Timed out after {}s",
                core.config.job_timeout.as_secs()
            );
            handle_failure(&core, job, message, None).await;
        }
    }

    drop(permit);
}

/// Requeues a failed attempt after the retry delay, or fails the job
/// terminally when attempts are exhausted. Timeouts land here too and
/// count against the attempt budget.
async fn handle_failure(
    core: &Arc<QueueCore>,
    mut job: Job,
    message: String,
    quality_score: Option<f64>,
) {
    warn!(
        job_id = %job.id,
        subject_id = %job.subject_id,
        attempt = job.attempts,
        max_attempts = job.max_attempts,
        error = %message,
        "Job attempt failed"
    );

    if job.should_retry() {
        // The job keeps its slot through the delay so the requeue is
        // not claimed early.
        tokio::time::sleep(core.config.retry_delay).await;

        job.status = JobStatus::Pending;
        job.progress = 0;
        job.error_message = Some(message.clone());
        job.started_at = None;
        job.worker_id = None;
        if let Err(err) = core.store.update(&job).await {
            error!(job_id = %job.id, error = %err, "Failed to requeue job");
        }
        core.bus.publish(
            event::JOB_FAILED,
            json!({
                "job_id": job.id,
                "subject_id": job.subject_id,
                "error": message,
                "attempt": job.attempts,
                "will_retry": true,
            }),
        );
        core.wake.notify_one();
        return;
    }

    job.status = JobStatus::Failed;
    job.completed_at = Some(Utc::now());
    job.error_message = Some(message.clone());
    let duration_ms = duration_ms(&job);
    if let Err(err) = core.store.update(&job).await {
        error!(job_id = %job.id, error = %err, "Failed to persist failed job");
    }

    core.bus.publish(
        event::JOB_FAILED,
        json!({
            "job_id": job.id,
            "subject_id": job.subject_id,
            "error": message,
            "attempt": job.attempts,
            "will_retry": false,
            "score": quality_score,
        }),
    );
    let _ = core.outcomes.send(JobOutcome {
        job_id: job.id,
        subject_id: job.subject_id.clone(),
        status: JobStatus::Failed,
        error_message: Some(message),
        duration_ms,
        attempts: job.attempts,
        quality_score,
        finished_at: Utc::now(),
    });
}

/// Publishes a time-based progress estimate while a job executes,
/// capped at 90 until the real outcome is known.
async fn progress_loop(core: Arc<QueueCore>, job: Job) {
    let expected_ms = match core.store.average_processing_ms().await {
        Ok(Some(avg)) if avg >= 1000.0 => avg,
        _ => 60_000.0,
    };
    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(core.config.progress_interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let elapsed_ms = started.elapsed().as_millis() as f64;
        let pct = ((elapsed_ms / expected_ms) * 100.0).min(90.0) as u8;
        if let Err(err) = core.store.set_progress(job.id, pct).await {
            debug!(job_id = %job.id, error = %err, "Failed to persist progress");
            continue;
        }
        core.bus.publish(
            event::JOB_PROGRESS,
            json!({
                "job_id": job.id,
                "subject_id": job.subject_id,
                "progress": pct,
            }),
        );
    }
}

fn duration_ms(job: &Job) -> u64 {
    job.processing_duration()
        .map(|d| d.num_milliseconds().max(0) as u64)
        .unwrap_or(0)
}
