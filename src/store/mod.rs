//! Durable job store.
//!
//! The store is the single source of truth for job state; the queue and
//! controller never keep authoritative state only in memory. All status
//! transitions are single-row read-modify-write operations, and the two
//! operations that race under concurrent admission are atomic:
//!
//! - [`JobStore::insert_unique`]: the per-subject dedup check and the
//!   insert happen as one step.
//! - [`JobStore::claim_next_pending`]: the `pending → processing`
//!   transition claims exclusive ownership of one job.

mod memory;
mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::queue::{Job, JobStatus};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the backing database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Job not found.
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    /// Serialization of a persisted payload failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted row contained a value the model cannot represent.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

/// Outcome of [`JobStore::insert_unique`].
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// The job was inserted.
    Inserted,
    /// An active job already exists for the subject; it is returned
    /// instead of inserting a duplicate.
    AlreadyActive(Job),
}

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    /// Total number of jobs across all statuses.
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Durable record of jobs and their status.
///
/// `query_pending` and `claim_next_pending` order by priority
/// descending, then creation time ascending. This is the queue's
/// admission order.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a job unless an active (pending or processing) job
    /// already exists for the same subject. Atomic with respect to
    /// concurrent inserts for that subject.
    async fn insert_unique(&self, job: &Job) -> Result<InsertOutcome, StoreError>;

    /// Fetches a job by id.
    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Returns the active job for a subject, if one exists.
    async fn find_active_by_subject(&self, subject_id: &str) -> Result<Option<Job>, StoreError>;

    /// Atomically claims the highest-priority pending job: sets status
    /// to processing, records `started_at` and `worker_id`, and
    /// increments the attempt counter. Returns `None` when no pending
    /// job exists.
    async fn claim_next_pending(&self, worker_id: &str) -> Result<Option<Job>, StoreError>;

    /// Persists the full state of a job by id.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Updates only the progress column of a processing job.
    async fn set_progress(&self, id: Uuid, progress: u8) -> Result<(), StoreError>;

    /// Transitions a job to failed with [`crate::queue::CANCELLED_MESSAGE`]
    /// only if it is still pending. Returns whether the transition
    /// happened.
    async fn cancel_if_pending(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Returns pending jobs in admission order, up to `limit`.
    async fn query_pending(&self, limit: u32) -> Result<Vec<Job>, StoreError>;

    /// Returns jobs with the given status, newest first, up to `limit`.
    async fn query_by_status(&self, status: JobStatus, limit: u32) -> Result<Vec<Job>, StoreError>;

    /// Returns the full job history for a subject, newest first.
    async fn jobs_for_subject(&self, subject_id: &str) -> Result<Vec<Job>, StoreError>;

    /// Per-status counts over all jobs.
    async fn count_by_status(&self) -> Result<StatusCounts, StoreError>;

    /// Average wall-clock processing time of completed jobs, in
    /// milliseconds. `None` when no completed job exists.
    async fn average_processing_ms(&self) -> Result<Option<f64>, StoreError>;

    /// Deletes jobs in the given terminal statuses created before the
    /// cutoff. Returns the number of deleted rows. Irreversible.
    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[JobStatus],
    ) -> Result<u64, StoreError>;
}
