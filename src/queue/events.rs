//! Terminal job outcomes delivered to downstream consumers.
//!
//! The queue pushes one [`JobOutcome`] per terminal transition onto an
//! unbounded channel. Exactly one consumer (in practice the pipeline
//! controller) takes the receiver; a second take returns `None`.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::queue::job::JobStatus;

/// Terminal result of a job, emitted once per job when it completes,
/// permanently fails, or is cancelled.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub subject_id: String,
    /// Terminal status: always `Completed` or `Failed`.
    pub status: JobStatus,
    /// Failure or cancellation message when `status` is `Failed`.
    pub error_message: Option<String>,
    /// Wall-clock processing time, start to terminal transition.
    pub duration_ms: u64,
    /// Attempts consumed, including the terminal one.
    pub attempts: u32,
    /// Final evaluated quality score, when a draft was scored: the
    /// accepted draft on success, the best rejected draft when the job
    /// failed at the gate.
    pub quality_score: Option<f64>,
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

pub type OutcomeSender = mpsc::UnboundedSender<JobOutcome>;
pub type OutcomeReceiver = mpsc::UnboundedReceiver<JobOutcome>;

pub fn outcome_channel() -> (OutcomeSender, OutcomeReceiver) {
    mpsc::unbounded_channel()
}
