//! Job definitions for the priority queue.
//!
//! A [`Job`] is one unit of generation work keyed by the subject it
//! operates on. Jobs move through a small lifecycle:
//!
//! `pending` → `processing` → `completed`, or back to `pending` on a
//! retryable failure, or `failed` once attempts are exhausted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::generator::GenerationParams;

/// Default maximum number of attempts before a job fails terminally.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default priority (0 is normal; higher values run sooner).
pub const DEFAULT_PRIORITY: i32 = 0;

/// Error message recorded when a pending job is cancelled.
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be admitted.
    Pending,
    /// Claimed by the queue and executing.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully after exhausting attempts, or cancelled.
    Failed,
}

impl JobStatus {
    /// Returns whether this status counts as active for admission
    /// dedup (at most one active job per subject).
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    /// Returns whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Stable string form used in the store and on the bus.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parses the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of generation work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: Uuid,
    /// Identifier of the subject this job operates on. At most one
    /// pending/processing job may exist per subject.
    pub subject_id: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Priority (higher values are admitted sooner).
    pub priority: i32,
    /// Number of attempts made so far.
    pub attempts: u32,
    /// Maximum attempts before the job fails terminally.
    pub max_attempts: u32,
    /// Generation parameters for this job.
    pub parameters: GenerationParams,
    /// Progress estimate, 0-100. Time-based while processing; not a
    /// guarantee of actual generator progress.
    pub progress: u8,
    /// Last error message, if any attempt failed.
    pub error_message: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the current attempt was claimed, if processing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Identifier of the execution that claimed this job.
    pub worker_id: Option<String>,
}

impl Job {
    /// Creates a new pending job for a subject.
    pub fn new(subject_id: impl Into<String>, parameters: GenerationParams, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            status: JobStatus::Pending,
            priority,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            parameters,
            progress: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
        }
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Returns whether another attempt is allowed after a failure.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Returns the number of remaining attempts.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    /// Returns how long ago the job was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Returns the processing duration of the current or last attempt.
    pub fn processing_duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some(end - started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> Job {
        Job::new("subject-1", GenerationParams::default(), DEFAULT_PRIORITY)
    }

    #[test]
    fn test_job_new() {
        let job = test_job();

        assert!(!job.id.is_nil());
        assert_eq!(job.subject_id, "subject-1");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.priority, 0);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(job.progress, 0);
        assert!(job.error_message.is_none());
        assert!(job.started_at.is_none());
        assert!(job.worker_id.is_none());
    }

    #[test]
    fn test_retry_accounting() {
        let mut job = test_job().with_max_attempts(2);

        assert!(job.should_retry());
        assert_eq!(job.remaining_attempts(), 2);

        job.attempts += 1;
        assert!(job.should_retry());
        assert_eq!(job.remaining_attempts(), 1);

        job.attempts += 1;
        assert!(!job.should_retry());
        assert_eq!(job.remaining_attempts(), 0);
    }

    #[test]
    fn test_status_is_active() {
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Processing.is_active());
        assert!(!JobStatus::Completed.is_active());
        assert!(!JobStatus::Failed.is_active());
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("unknown"), None);
    }

    #[test]
    fn test_job_serialization() {
        let job = test_job();
        let json = serde_json::to_string(&job).expect("serialization should work");
        let parsed: Job = serde_json::from_str(&json).expect("deserialization should work");

        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.subject_id, job.subject_id);
        assert_eq!(parsed.status, job.status);
    }

    #[test]
    fn test_processing_duration() {
        let mut job = test_job();
        assert!(job.processing_duration().is_none());

        job.started_at = Some(Utc::now() - chrono::Duration::seconds(10));
        job.completed_at = Some(Utc::now());
        let duration = job.processing_duration().expect("should have duration");
        assert!(duration.num_seconds() >= 9);
    }
}
