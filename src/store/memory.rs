//! In-memory job store.
//!
//! Backs tests and single-process embeddings. All operations take one
//! mutex, which makes the dedup insert and the claim trivially atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::queue::{Job, JobStatus, CANCELLED_MESSAGE};

use super::{InsertOutcome, JobStore, StatusCounts, StoreError};

/// Job store held entirely in process memory.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Returns whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

/// Admission order: priority descending, creation time ascending.
fn admission_order(a: &Job, b: &Job) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_unique(&self, job: &Job) -> Result<InsertOutcome, StoreError> {
        let mut jobs = self.jobs.lock().await;

        if let Some(existing) = jobs
            .values()
            .find(|j| j.subject_id == job.subject_id && j.status.is_active())
        {
            return Ok(InsertOutcome::AlreadyActive(existing.clone()));
        }

        jobs.insert(job.id, job.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn find_active_by_subject(&self, subject_id: &str) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .find(|j| j.subject_id == subject_id && j.status.is_active())
            .cloned())
    }

    async fn claim_next_pending(&self, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;

        let next_id = {
            let mut pending: Vec<&Job> = jobs
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .collect();
            pending.sort_by(|a, b| admission_order(a, b));
            pending.first().map(|j| j.id)
        };

        let Some(id) = next_id else {
            return Ok(None);
        };

        let job = jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound(id))?;
        job.status = JobStatus::Processing;
        job.started_at = Some(Utc::now());
        job.worker_id = Some(worker_id.to_string());
        job.attempts += 1;
        Ok(Some(job.clone()))
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        if !jobs.contains_key(&job.id) {
            return Err(StoreError::JobNotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn set_progress(&self, id: Uuid, progress: u8) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        job.progress = progress.min(100);
        Ok(())
    }

    async fn cancel_if_pending(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        job.status = JobStatus::Failed;
        job.error_message = Some(CANCELLED_MESSAGE.to_string());
        job.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn query_pending(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut pending: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(admission_order);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn query_by_status(&self, status: JobStatus, limit: u32) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn jobs_for_subject(&self, subject_id: &str) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| j.subject_id == subject_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut counts = StatusCounts::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn average_processing_ms(&self) -> Result<Option<f64>, StoreError> {
        let jobs = self.jobs.lock().await;
        let durations: Vec<i64> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Completed)
            .filter_map(|j| {
                let started = j.started_at?;
                let completed = j.completed_at?;
                Some((completed - started).num_milliseconds())
            })
            .collect();

        if durations.is_empty() {
            return Ok(None);
        }
        let sum: i64 = durations.iter().sum();
        Ok(Some(sum as f64 / durations.len() as f64))
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[JobStatus],
    ) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, j| !(statuses.contains(&j.status) && j.created_at < cutoff));
        Ok((before - jobs.len()) as u64)
    }
}
