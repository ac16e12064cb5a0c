//! Stage transitions and background supervision.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{event, NotificationBus, NullBus};
use crate::generator::GenerationParams;
use crate::pipeline::config::{ControllerConfig, ControllerConfigError};
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::record::{CatalogError, RecordStatus, SubjectAccessor};
use crate::queue::{
    Job, JobOutcome, JobQueue, JobStatus, OutcomeReceiver, QueueError, QueueStats,
    CANCELLED_MESSAGE,
};

/// Errors surfaced by controller operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Config(#[from] ControllerConfigError),

    /// The controller has already been started.
    #[error("Pipeline controller is already running")]
    AlreadyRunning,

    /// The queue's outcome receiver was taken by someone else.
    #[error("Job outcome stream is unavailable")]
    OutcomesUnavailable,

    /// The record's stage does not allow the requested operation.
    #[error("Subject {id} is {status} and not eligible for generation")]
    NotEligible { id: String, status: RecordStatus },

    /// No active job exists for the subject.
    #[error("Subject {0} has no active generation job")]
    NoActiveJob(String),
}

/// Hand-off point for records leaving the generation stage.
///
/// Both methods default to no-ops; downstream stages (review queues,
/// renderers) implement what they need.
#[async_trait]
pub trait StageHook: Send + Sync {
    /// Called after a record moved to generated.
    async fn on_generated(&self, subject_id: &str, outcome: &JobOutcome) {
        let _ = (subject_id, outcome);
    }

    /// Called after a generation failed terminally and the record was
    /// returned to selected or parked in failed.
    async fn on_failed(&self, subject_id: &str, outcome: &JobOutcome) {
        let _ = (subject_id, outcome);
    }
}

/// Hook that does nothing.
pub struct NoopHook;

#[async_trait]
impl StageHook for NoopHook {}

/// Point-in-time view of the controller.
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub running: bool,
    pub queue: QueueStats,
    pub metrics: PipelineMetrics,
}

/// Stage and job history for one subject.
#[derive(Debug, Clone)]
pub struct PipelineHistory {
    /// Jobs for the subject, newest first.
    pub jobs: Vec<Job>,
    pub current_status: RecordStatus,
    /// Most recent job activity, or the record's last stage change
    /// when no jobs exist.
    pub last_activity: DateTime<Utc>,
}

/// Advances catalog records through the generation stage.
pub struct PipelineController {
    config: ControllerConfig,
    queue: Arc<JobQueue>,
    catalog: Arc<dyn SubjectAccessor>,
    bus: Arc<dyn NotificationBus>,
    hook: Arc<dyn StageHook>,
    metrics: Arc<Mutex<PipelineMetrics>>,
    shutdown: broadcast::Sender<()>,
    outcome_task: Mutex<Option<JoinHandle<OutcomeReceiver>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    outcomes_rx: std::sync::Mutex<Option<OutcomeReceiver>>,
    running: AtomicBool,
}

impl PipelineController {
    /// Creates a stopped controller.
    pub fn new(
        queue: Arc<JobQueue>,
        catalog: Arc<dyn SubjectAccessor>,
        config: ControllerConfig,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            queue,
            catalog,
            bus: Arc::new(NullBus),
            hook: Arc::new(NoopHook),
            metrics: Arc::new(Mutex::new(PipelineMetrics::default())),
            shutdown,
            outcome_task: Mutex::new(None),
            sweep_task: Mutex::new(None),
            outcomes_rx: std::sync::Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Replaces the notification bus. Only meaningful before `start`.
    pub fn with_bus(mut self, bus: Arc<dyn NotificationBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Sets the hand-off hook for records leaving generation.
    pub fn with_hook(mut self, hook: Arc<dyn StageHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Returns whether the background loops are running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the queue, the outcome loop, and the background sweep.
    pub async fn start(&self) -> Result<(), PipelineError> {
        self.config.validate()?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyRunning);
        }

        // A previous stop hands the receiver back; only the very first
        // start takes it from the queue.
        let parked_rx = self
            .outcomes_rx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        let outcomes = match parked_rx.or_else(|| self.queue.take_outcomes()) {
            Some(outcomes) => outcomes,
            None => {
                self.running.store(false, Ordering::SeqCst);
                return Err(PipelineError::OutcomesUnavailable);
            }
        };

        if let Err(err) = self.queue.start().await {
            // A queue started by the caller beforehand is fine.
            if !matches!(err, QueueError::AlreadyRunning) {
                self.running.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        }

        *self.outcome_task.lock().await = Some(tokio::spawn(outcome_loop(
            outcomes,
            Arc::clone(&self.queue),
            Arc::clone(&self.catalog),
            Arc::clone(&self.bus),
            Arc::clone(&self.hook),
            Arc::clone(&self.metrics),
            self.config.max_subject_failures,
            self.shutdown.subscribe(),
        )));
        *self.sweep_task.lock().await = Some(tokio::spawn(sweep_loop(
            self.config.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.catalog),
            self.shutdown.subscribe(),
        )));

        info!(
            check_interval_secs = self.config.check_interval.as_secs(),
            sweep_batch = self.config.sweep_batch,
            "Pipeline controller started"
        );
        Ok(())
    }

    /// Stops the background loops and the queue.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(());
        if let Some(task) = self.outcome_task.lock().await.take() {
            match task.await {
                Ok(outcomes) => {
                    if let Ok(mut guard) = self.outcomes_rx.lock() {
                        *guard = Some(outcomes);
                    }
                }
                Err(err) => warn!(error = %err, "Outcome task ended abnormally"),
            }
        }
        if let Some(task) = self.sweep_task.lock().await.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Sweep task ended abnormally");
            }
        }
        self.queue.stop().await;
        info!("Pipeline controller stopped");
    }

    /// Enqueues generation for one record and moves it to generating.
    ///
    /// Idempotent: if an active job already exists for the subject,
    /// that job is returned and the stage is left alone.
    pub async fn trigger_generation(
        &self,
        subject_id: &str,
        parameters: GenerationParams,
        priority: i32,
    ) -> Result<Job, PipelineError> {
        let subject = self.catalog.get_subject(subject_id).await?;
        if matches!(subject.status, RecordStatus::Approved) {
            return Err(PipelineError::NotEligible {
                id: subject_id.to_string(),
                status: subject.status,
            });
        }

        let job = self.queue.create_job(subject_id, parameters, priority).await?;
        if subject.status != RecordStatus::Generating {
            self.catalog
                .set_status(subject_id, RecordStatus::Generating)
                .await?;
        }
        Ok(job)
    }

    /// Enqueues generation for a batch of records. Failing items are
    /// logged and skipped; jobs for the items that succeeded are
    /// returned.
    pub async fn trigger_batch_generation(
        &self,
        subject_ids: &[String],
        parameters: GenerationParams,
        priority: i32,
    ) -> Vec<Job> {
        let mut jobs = Vec::with_capacity(subject_ids.len());
        for subject_id in subject_ids {
            match self
                .trigger_generation(subject_id, parameters.clone(), priority)
                .await
            {
                Ok(job) => jobs.push(job),
                Err(err) => {
                    error!(subject_id = %subject_id, error = %err, "Batch trigger item failed");
                }
            }
        }
        jobs
    }

    /// Cancels the pending generation job for a subject and returns the
    /// record to selected. A job that is already executing cannot be
    /// cancelled.
    pub async fn cancel_generation(&self, subject_id: &str) -> Result<Job, PipelineError> {
        let history = self.queue.subject_history(subject_id).await?;
        let active = history
            .into_iter()
            .find(|job| job.status.is_active())
            .ok_or_else(|| PipelineError::NoActiveJob(subject_id.to_string()))?;

        let cancelled = self.queue.cancel_job(active.id).await?;
        self.catalog
            .set_status(subject_id, RecordStatus::Selected)
            .await?;
        Ok(cancelled)
    }

    /// Forces one record back to selected, cancelling its pending
    /// generation job first when there is one. A job that is already
    /// executing cannot be interrupted; it runs to completion against
    /// whatever stage the record is in by then.
    pub async fn reset_pipeline(&self, subject_id: &str) -> Result<(), PipelineError> {
        match self.cancel_generation(subject_id).await {
            Ok(job) => {
                info!(subject_id, job_id = %job.id, "Reset cancelled pending job");
            }
            Err(PipelineError::NoActiveJob(_)) => {}
            Err(PipelineError::Queue(QueueError::NotCancellable { id, status })) => {
                warn!(subject_id, job_id = %id, status = %status, "Reset left executing job alone");
            }
            Err(err) => return Err(err),
        }
        self.catalog
            .set_status(subject_id, RecordStatus::Selected)
            .await?;
        info!(subject_id, "Record reset to selected");
        Ok(())
    }

    /// Returns the record's stage and full job history, newest first.
    pub async fn get_pipeline_history(
        &self,
        subject_id: &str,
    ) -> Result<PipelineHistory, PipelineError> {
        let subject = self.catalog.get_subject(subject_id).await?;
        let jobs = self.queue.subject_history(subject_id).await?;
        let last_activity = jobs
            .first()
            .map(|job| job.completed_at.or(job.started_at).unwrap_or(job.created_at))
            .unwrap_or(subject.stage_changed_at);
        Ok(PipelineHistory {
            jobs,
            current_status: subject.status,
            last_activity,
        })
    }

    /// Returns a snapshot of controller and queue state.
    pub async fn get_status(&self) -> Result<PipelineStatus, PipelineError> {
        Ok(PipelineStatus {
            running: self.is_running(),
            queue: self.queue.get_queue_stats().await?,
            metrics: self.metrics.lock().await.clone(),
        })
    }
}

/// Applies terminal job outcomes to catalog records. Returns the
/// receiver on shutdown so the controller can start again later.
#[allow(clippy::too_many_arguments)]
async fn outcome_loop(
    mut outcomes: OutcomeReceiver,
    queue: Arc<JobQueue>,
    catalog: Arc<dyn SubjectAccessor>,
    bus: Arc<dyn NotificationBus>,
    hook: Arc<dyn StageHook>,
    metrics: Arc<Mutex<PipelineMetrics>>,
    max_subject_failures: u32,
    mut shutdown: broadcast::Receiver<()>,
) -> OutcomeReceiver {
    loop {
        let outcome = tokio::select! {
            outcome = outcomes.recv() => match outcome {
                Some(outcome) => outcome,
                None => return outcomes,
            },
            _ = shutdown.recv() => return outcomes,
        };

        if outcome.status == JobStatus::Completed {
            if let Err(err) = catalog
                .set_status(&outcome.subject_id, RecordStatus::Generated)
                .await
            {
                error!(
                    subject_id = %outcome.subject_id,
                    error = %err,
                    "Failed to advance record after generation"
                );
            }
            metrics.lock().await.record_success(outcome.duration_ms);
            bus.publish(
                event::STAGE_COMPLETED,
                json!({
                    "subject_id": outcome.subject_id,
                    "job_id": outcome.job_id,
                    "score": outcome.quality_score,
                    "duration_ms": outcome.duration_ms,
                }),
            );
            hook.on_generated(&outcome.subject_id, &outcome).await;
        } else {
            // Below the failure budget the record stays eligible; a
            // later sweep or trigger tries again with a fresh attempt
            // budget. At the budget it is parked until an operator
            // resets or re-triggers it.
            let cancelled = outcome.error_message.as_deref() == Some(CANCELLED_MESSAGE);
            let parked = !cancelled
                && consecutive_failures(&queue, &outcome.subject_id).await
                    >= u64::from(max_subject_failures);
            let next_stage = if parked {
                RecordStatus::Failed
            } else {
                RecordStatus::Selected
            };
            if let Err(err) = catalog.set_status(&outcome.subject_id, next_stage).await {
                error!(
                    subject_id = %outcome.subject_id,
                    error = %err,
                    "Failed to update record after failed generation"
                );
            }
            if parked {
                warn!(
                    subject_id = %outcome.subject_id,
                    "Record parked after repeated generation failures"
                );
            }
            metrics.lock().await.record_failure(outcome.duration_ms);
            bus.publish(
                event::STAGE_FAILED,
                json!({
                    "subject_id": outcome.subject_id,
                    "job_id": outcome.job_id,
                    "error": outcome.error_message,
                    "attempts": outcome.attempts,
                    "parked": parked,
                }),
            );
            hook.on_failed(&outcome.subject_id, &outcome).await;
        }
    }
}

/// Streak of terminally-failed jobs at the head of the subject's
/// history. Cancellations don't count; the streak ends at the first
/// completed job.
async fn consecutive_failures(queue: &JobQueue, subject_id: &str) -> u64 {
    let history = match queue.subject_history(subject_id).await {
        Ok(history) => history,
        Err(err) => {
            warn!(subject_id, error = %err, "Could not read subject history");
            return 0;
        }
    };
    let mut streak = 0;
    for job in history {
        match job.status {
            JobStatus::Failed if job.error_message.as_deref() == Some(CANCELLED_MESSAGE) => {}
            JobStatus::Failed => streak += 1,
            JobStatus::Completed => break,
            _ => {}
        }
    }
    streak
}

/// Periodically admits selected records and recovers records stuck in
/// generating after a crash.
async fn sweep_loop(
    config: ControllerConfig,
    queue: Arc<JobQueue>,
    catalog: Arc<dyn SubjectAccessor>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(config.check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.recv() => return,
        }

        if let Err(err) = sweep_once(&config, &queue, &catalog).await {
            warn!(error = %err, "Pipeline sweep failed");
        }
    }
}

async fn sweep_once(
    config: &ControllerConfig,
    queue: &JobQueue,
    catalog: &Arc<dyn SubjectAccessor>,
) -> Result<(), PipelineError> {
    // Admit selected records, oldest stage change first.
    let selected = catalog
        .list_in_status(RecordStatus::Selected, config.sweep_batch)
        .await?;
    for subject in selected {
        queue
            .create_job(
                subject.id.clone(),
                GenerationParams::default(),
                config.sweep_priority,
            )
            .await?;
        catalog
            .set_status(&subject.id, RecordStatus::Generating)
            .await?;
        debug!(subject_id = %subject.id, "Sweep admitted record");
    }

    // Recover records whose job vanished (crash between claim and
    // outcome): generating for too long with nothing active.
    let generating = catalog
        .list_in_status(RecordStatus::Generating, config.sweep_batch)
        .await?;
    let cutoff = Utc::now()
        - chrono::Duration::from_std(config.stuck_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(1800));
    for subject in generating {
        if subject.stage_changed_at > cutoff {
            continue;
        }
        let has_active = queue
            .subject_history(&subject.id)
            .await?
            .iter()
            .any(|job| job.status.is_active());
        if has_active {
            continue;
        }
        warn!(subject_id = %subject.id, "Recovering record stuck in generating");
        catalog
            .set_status(&subject.id, RecordStatus::Selected)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::artifact::Artifact;
    use crate::executor::{ExecutionError, ExecutionReport, JobExecutor};
    use crate::generator::GenerationError;
    use crate::pipeline::record::SubjectSnapshot;
    use crate::queue::QueueConfig;
    use crate::store::MemoryJobStore;

    /// Catalog backed by an in-memory map.
    struct MemoryCatalog {
        subjects: std::sync::Mutex<HashMap<String, SubjectSnapshot>>,
    }

    impl MemoryCatalog {
        fn new(subjects: Vec<SubjectSnapshot>) -> Self {
            Self {
                subjects: std::sync::Mutex::new(
                    subjects.into_iter().map(|s| (s.id.clone(), s)).collect(),
                ),
            }
        }

        fn status_of(&self, id: &str) -> Option<RecordStatus> {
            self.subjects.lock().unwrap().get(id).map(|s| s.status)
        }
    }

    #[async_trait]
    impl SubjectAccessor for MemoryCatalog {
        async fn get_subject(&self, id: &str) -> Result<SubjectSnapshot, CatalogError> {
            self.subjects
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| CatalogError::NotFound(id.to_string()))
        }

        async fn set_status(&self, id: &str, status: RecordStatus) -> Result<(), CatalogError> {
            let mut subjects = self.subjects.lock().unwrap();
            let subject = subjects
                .get_mut(id)
                .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
            subject.status = status;
            subject.stage_changed_at = Utc::now();
            Ok(())
        }

        async fn list_in_status(
            &self,
            status: RecordStatus,
            limit: usize,
        ) -> Result<Vec<SubjectSnapshot>, CatalogError> {
            let subjects = self.subjects.lock().unwrap();
            let mut matching: Vec<SubjectSnapshot> = subjects
                .values()
                .filter(|s| s.status == status)
                .cloned()
                .collect();
            matching.sort_by_key(|s| s.stage_changed_at);
            matching.truncate(limit);
            Ok(matching)
        }
    }

    struct OkExecutor;

    #[async_trait]
    impl JobExecutor for OkExecutor {
        async fn execute(&self, _job: &Job) -> Result<ExecutionReport, ExecutionError> {
            Ok(ExecutionReport {
                artifact: Artifact::new("Draft", 180),
                validation: crate::quality::ValidationResult {
                    score: 85.0,
                    is_valid: true,
                    issues: Vec::new(),
                    suggestions: Vec::new(),
                    breakdown: Default::default(),
                },
            })
        }
    }

    struct FailExecutor;

    #[async_trait]
    impl JobExecutor for FailExecutor {
        async fn execute(&self, _job: &Job) -> Result<ExecutionReport, ExecutionError> {
            Err(ExecutionError::Generation(GenerationError::Failed(
                "no service".to_string(),
            )))
        }
    }

    fn fast_queue_config() -> QueueConfig {
        QueueConfig {
            max_concurrent: 2,
            job_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_millis(5),
            idle_backoff: Duration::from_millis(20),
            progress_interval: Duration::from_millis(50),
        }
    }

    fn fast_controller_config() -> ControllerConfig {
        ControllerConfig {
            check_interval: Duration::from_millis(50),
            sweep_batch: 10,
            stuck_after: Duration::from_millis(100),
            sweep_priority: 0,
            max_subject_failures: 3,
        }
    }

    fn controller_with(
        executor: Arc<dyn JobExecutor>,
        subjects: Vec<SubjectSnapshot>,
    ) -> (Arc<PipelineController>, Arc<MemoryCatalog>) {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(JobQueue::new(store, executor, fast_queue_config()));
        let catalog = Arc::new(MemoryCatalog::new(subjects));
        let controller = Arc::new(PipelineController::new(
            queue,
            Arc::clone(&catalog) as Arc<dyn SubjectAccessor>,
            fast_controller_config(),
        ));
        (controller, catalog)
    }

    async fn wait_for_status(catalog: &MemoryCatalog, id: &str, status: RecordStatus) {
        for _ in 0..100 {
            if catalog.status_of(id) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("subject {id} never reached {status}");
    }

    #[tokio::test]
    async fn test_trigger_moves_record_to_generating() {
        let (controller, catalog) =
            controller_with(Arc::new(OkExecutor), vec![SubjectSnapshot::new("s1", "One")]);

        let job = controller
            .trigger_generation("s1", GenerationParams::default(), 5)
            .await
            .expect("trigger");
        assert_eq!(job.subject_id, "s1");
        assert_eq!(job.priority, 5);
        assert_eq!(catalog.status_of("s1"), Some(RecordStatus::Generating));
    }

    #[tokio::test]
    async fn test_trigger_unknown_subject() {
        let (controller, _catalog) = controller_with(Arc::new(OkExecutor), vec![]);
        let err = controller
            .trigger_generation("nope", GenerationParams::default(), 0)
            .await
            .expect_err("unknown subject");
        assert!(matches!(err, PipelineError::Catalog(CatalogError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_trigger_is_idempotent_for_active_job() {
        let (controller, _catalog) =
            controller_with(Arc::new(OkExecutor), vec![SubjectSnapshot::new("s1", "One")]);

        let first = controller
            .trigger_generation("s1", GenerationParams::default(), 0)
            .await
            .expect("trigger");
        let second = controller
            .trigger_generation("s1", GenerationParams::default(), 0)
            .await
            .expect("trigger again");
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_approved_record_not_eligible() {
        let subject = SubjectSnapshot::new("s1", "One").with_status(RecordStatus::Approved);
        let (controller, _catalog) = controller_with(Arc::new(OkExecutor), vec![subject]);

        let err = controller
            .trigger_generation("s1", GenerationParams::default(), 0)
            .await
            .expect_err("approved is terminal for the pipeline");
        assert!(matches!(err, PipelineError::NotEligible { .. }));
    }

    #[tokio::test]
    async fn test_successful_outcome_advances_record() {
        struct Recorder {
            generated: AtomicUsize,
        }

        #[async_trait]
        impl StageHook for Recorder {
            async fn on_generated(&self, _subject_id: &str, _outcome: &JobOutcome) {
                self.generated.fetch_add(1, Ordering::SeqCst);
            }
        }

        let hook = Arc::new(Recorder {
            generated: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(JobQueue::new(
            store,
            Arc::new(OkExecutor),
            fast_queue_config(),
        ));
        let catalog = Arc::new(MemoryCatalog::new(vec![SubjectSnapshot::new("s1", "One")]));
        let controller = PipelineController::new(
            queue,
            Arc::clone(&catalog) as Arc<dyn SubjectAccessor>,
            fast_controller_config(),
        )
        .with_hook(Arc::clone(&hook) as Arc<dyn StageHook>);

        controller.start().await.expect("start");
        controller
            .trigger_generation("s1", GenerationParams::default(), 0)
            .await
            .expect("trigger");
        wait_for_status(&catalog, "s1", RecordStatus::Generated).await;
        controller.stop().await;

        assert_eq!(hook.generated.load(Ordering::SeqCst), 1);
        let status = controller.get_status().await.expect("status");
        assert_eq!(status.metrics.success_count, 1);
        assert_eq!(status.queue.completed, 1);
    }

    #[tokio::test]
    async fn test_failed_outcome_returns_record_to_selected() {
        // A slow sweep keeps the background loop from re-admitting the
        // record while the test watches for the revert.
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(JobQueue::new(
            store,
            Arc::new(FailExecutor),
            fast_queue_config(),
        ));
        let catalog = Arc::new(MemoryCatalog::new(vec![SubjectSnapshot::new("s1", "One")]));
        let controller = PipelineController::new(
            queue,
            Arc::clone(&catalog) as Arc<dyn SubjectAccessor>,
            ControllerConfig {
                check_interval: Duration::from_secs(60),
                stuck_after: Duration::from_secs(3600),
                ..fast_controller_config()
            },
        );

        controller.start().await.expect("start");
        controller
            .trigger_generation("s1", GenerationParams::default(), 0)
            .await
            .expect("trigger");
        wait_for_status(&catalog, "s1", RecordStatus::Generating).await;
        wait_for_status(&catalog, "s1", RecordStatus::Selected).await;
        controller.stop().await;

        let status = controller.get_status().await.expect("status");
        assert_eq!(status.metrics.failure_count, 1);
        assert_eq!(status.metrics.success_count, 0);
    }

    #[tokio::test]
    async fn test_sweep_admits_selected_records() {
        let (controller, catalog) = controller_with(
            Arc::new(OkExecutor),
            vec![
                SubjectSnapshot::new("s1", "One"),
                SubjectSnapshot::new("s2", "Two"),
            ],
        );

        controller.start().await.expect("start");
        wait_for_status(&catalog, "s1", RecordStatus::Generated).await;
        wait_for_status(&catalog, "s2", RecordStatus::Generated).await;
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_batch_trigger_isolates_failures() {
        let (controller, _catalog) = controller_with(
            Arc::new(OkExecutor),
            vec![
                SubjectSnapshot::new("s1", "One"),
                SubjectSnapshot::new("s2", "Two"),
            ],
        );

        let jobs = controller
            .trigger_batch_generation(
                &[
                    "s1".to_string(),
                    "missing".to_string(),
                    "s2".to_string(),
                ],
                GenerationParams::default(),
                0,
            )
            .await;
        let subjects: Vec<&str> = jobs.iter().map(|j| j.subject_id.as_str()).collect();
        assert_eq!(subjects, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_cancel_generation_returns_record_to_selected() {
        // Queue is never started, so the job stays pending.
        let (controller, catalog) =
            controller_with(Arc::new(OkExecutor), vec![SubjectSnapshot::new("s1", "One")]);

        controller
            .trigger_generation("s1", GenerationParams::default(), 0)
            .await
            .expect("trigger");
        let cancelled = controller.cancel_generation("s1").await.expect("cancel");
        assert_eq!(cancelled.status, JobStatus::Failed);
        assert_eq!(catalog.status_of("s1"), Some(RecordStatus::Selected));

        let err = controller
            .cancel_generation("s1")
            .await
            .expect_err("nothing active");
        assert!(matches!(err, PipelineError::NoActiveJob(_)));
    }

    #[tokio::test]
    async fn test_reset_cancels_pending_job_and_reverts_record() {
        // Queue is never started, so the triggered job stays pending.
        let (controller, catalog) =
            controller_with(Arc::new(OkExecutor), vec![SubjectSnapshot::new("s1", "One")]);

        let job = controller
            .trigger_generation("s1", GenerationParams::default(), 0)
            .await
            .expect("trigger");
        assert_eq!(catalog.status_of("s1"), Some(RecordStatus::Generating));

        controller.reset_pipeline("s1").await.expect("reset");
        assert_eq!(catalog.status_of("s1"), Some(RecordStatus::Selected));

        let history = controller.get_pipeline_history("s1").await.expect("history");
        assert_eq!(history.jobs[0].id, job.id);
        assert_eq!(history.jobs[0].status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_reset_recovers_record_without_job() {
        let stuck = SubjectSnapshot::new("s1", "One").with_status(RecordStatus::Generating);
        let (controller, catalog) = controller_with(Arc::new(OkExecutor), vec![stuck]);

        controller.reset_pipeline("s1").await.expect("reset");
        assert_eq!(catalog.status_of("s1"), Some(RecordStatus::Selected));
    }

    #[tokio::test]
    async fn test_controller_restarts_after_stop() {
        // Slow sweep so only the manual triggers drive work.
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(JobQueue::new(
            store,
            Arc::new(OkExecutor),
            fast_queue_config(),
        ));
        let catalog = Arc::new(MemoryCatalog::new(vec![
            SubjectSnapshot::new("s1", "One"),
            SubjectSnapshot::new("s2", "Two"),
        ]));
        let controller = PipelineController::new(
            queue,
            Arc::clone(&catalog) as Arc<dyn SubjectAccessor>,
            ControllerConfig {
                check_interval: Duration::from_secs(60),
                stuck_after: Duration::from_secs(3600),
                ..fast_controller_config()
            },
        );

        controller.start().await.expect("first start");
        controller
            .trigger_generation("s1", GenerationParams::default(), 0)
            .await
            .expect("trigger s1");
        wait_for_status(&catalog, "s1", RecordStatus::Generated).await;
        controller.stop().await;

        controller.start().await.expect("second start");
        controller
            .trigger_generation("s2", GenerationParams::default(), 0)
            .await
            .expect("trigger s2");
        wait_for_status(&catalog, "s2", RecordStatus::Generated).await;
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_exhausted_record_parks_in_failed() {
        // Budget of one failed job; slow sweep so the parked stage is
        // observable and nothing re-admits the record.
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(JobQueue::new(
            store,
            Arc::new(FailExecutor),
            fast_queue_config(),
        ));
        let catalog = Arc::new(MemoryCatalog::new(vec![SubjectSnapshot::new("s1", "One")]));
        let controller = PipelineController::new(
            queue,
            Arc::clone(&catalog) as Arc<dyn SubjectAccessor>,
            ControllerConfig {
                check_interval: Duration::from_secs(60),
                stuck_after: Duration::from_secs(3600),
                max_subject_failures: 1,
                ..fast_controller_config()
            },
        );

        controller.start().await.expect("start");
        controller
            .trigger_generation("s1", GenerationParams::default(), 0)
            .await
            .expect("trigger");
        wait_for_status(&catalog, "s1", RecordStatus::Failed).await;
        controller.stop().await;

        let history = controller.get_pipeline_history("s1").await.expect("history");
        assert_eq!(history.jobs.len(), 1);
        assert_eq!(history.current_status, RecordStatus::Failed);
    }

    #[tokio::test]
    async fn test_history_reports_stage_and_jobs() {
        let (controller, _catalog) =
            controller_with(Arc::new(OkExecutor), vec![SubjectSnapshot::new("s1", "One")]);

        let before = controller.get_pipeline_history("s1").await.expect("history");
        assert!(before.jobs.is_empty());
        assert_eq!(before.current_status, RecordStatus::Selected);

        controller
            .trigger_generation("s1", GenerationParams::default(), 0)
            .await
            .expect("trigger");
        let history = controller.get_pipeline_history("s1").await.expect("history");
        assert_eq!(history.jobs.len(), 1);
        assert_eq!(history.jobs[0].subject_id, "s1");
        assert_eq!(history.current_status, RecordStatus::Generating);
        assert_eq!(history.last_activity, history.jobs[0].created_at);
    }
}
