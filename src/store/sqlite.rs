//! SQLite-backed job store using sqlx.
//!
//! One `jobs` table holds the whole record. The two racy transitions
//! are done as single statements so SQLite's write serialization makes
//! them atomic: the dedup insert is an `INSERT ... SELECT ... WHERE NOT
//! EXISTS`, and the claim is an `UPDATE ... RETURNING` against the
//! highest-priority pending row.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use crate::queue::{Job, JobStatus, CANCELLED_MESSAGE};

use super::{InsertOutcome, JobStore, StatusCounts, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id            TEXT PRIMARY KEY,
    subject_id    TEXT NOT NULL,
    status        TEXT NOT NULL,
    priority      INTEGER NOT NULL,
    attempts      INTEGER NOT NULL,
    max_attempts  INTEGER NOT NULL,
    parameters    TEXT NOT NULL,
    progress      INTEGER NOT NULL,
    error_message TEXT,
    created_at    TEXT NOT NULL,
    started_at    TEXT,
    completed_at  TEXT,
    worker_id     TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_admission
    ON jobs (status, priority DESC, created_at ASC);
CREATE INDEX IF NOT EXISTS idx_jobs_subject
    ON jobs (subject_id, status);
"#;

/// Job store persisted in a SQLite database.
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Connects to the database and creates the schema if missing.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string
    ///   (e.g. "sqlite:jobs.db?mode=rwc" or "sqlite::memory:")
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Creates a store from an existing pool, creating the schema if
    /// missing.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn row_to_job(row: &SqliteRow) -> Result<Job, StoreError> {
        let id: String = row.try_get("id")?;
        let id = Uuid::parse_str(&id)
            .map_err(|e| StoreError::CorruptRecord(format!("invalid job id '{id}': {e}")))?;

        let status: String = row.try_get("status")?;
        let status = JobStatus::parse(&status)
            .ok_or_else(|| StoreError::CorruptRecord(format!("unknown status '{status}'")))?;

        let parameters: String = row.try_get("parameters")?;
        let parameters = serde_json::from_str(&parameters)?;

        let attempts: i64 = row.try_get("attempts")?;
        let max_attempts: i64 = row.try_get("max_attempts")?;
        let progress: i64 = row.try_get("progress")?;

        Ok(Job {
            id,
            subject_id: row.try_get("subject_id")?,
            status,
            priority: row.try_get::<i64, _>("priority")? as i32,
            attempts: attempts as u32,
            max_attempts: max_attempts as u32,
            parameters,
            progress: progress.clamp(0, 100) as u8,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
            completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
            worker_id: row.try_get("worker_id")?,
        })
    }
}

#[async_trait::async_trait]
impl JobStore for SqliteJobStore {
    async fn insert_unique(&self, job: &Job) -> Result<InsertOutcome, StoreError> {
        let parameters = serde_json::to_string(&job.parameters)?;

        // Single statement: insert only when no active job exists for
        // the subject. SQLite serializes writers, so this is the
        // admission dedup point.
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, subject_id, status, priority, attempts, max_attempts,
                parameters, progress, error_message, created_at,
                started_at, completed_at, worker_id
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13
            WHERE NOT EXISTS (
                SELECT 1 FROM jobs
                WHERE subject_id = ?2 AND status IN ('pending', 'processing')
            )
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.subject_id)
        .bind(job.status.as_str())
        .bind(job.priority as i64)
        .bind(job.attempts as i64)
        .bind(job.max_attempts as i64)
        .bind(&parameters)
        .bind(job.progress as i64)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted);
        }

        match self.find_active_by_subject(&job.subject_id).await? {
            Some(existing) => Ok(InsertOutcome::AlreadyActive(existing)),
            // The blocking job reached a terminal status between the
            // two statements; treat the insert as lost to the race and
            // report the caller's job as not inserted.
            None => Err(StoreError::CorruptRecord(format!(
                "insert for subject '{}' rejected but no active job found",
                job.subject_id
            ))),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn find_active_by_subject(&self, subject_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE subject_id = ?1 AND status IN ('pending', 'processing')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn claim_next_pending(&self, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'processing',
                started_at = ?1,
                worker_id = ?2,
                attempts = attempts + 1
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let parameters = serde_json::to_string(&job.parameters)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                subject_id = ?2,
                status = ?3,
                priority = ?4,
                attempts = ?5,
                max_attempts = ?6,
                parameters = ?7,
                progress = ?8,
                error_message = ?9,
                created_at = ?10,
                started_at = ?11,
                completed_at = ?12,
                worker_id = ?13
            WHERE id = ?1
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.subject_id)
        .bind(job.status.as_str())
        .bind(job.priority as i64)
        .bind(job.attempts as i64)
        .bind(job.max_attempts as i64)
        .bind(&parameters)
        .bind(job.progress as i64)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job.id));
        }
        Ok(())
    }

    async fn set_progress(&self, id: Uuid, progress: u8) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE jobs SET progress = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(progress.min(100) as i64)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    async fn cancel_if_pending(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', error_message = ?2, completed_at = ?3
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id.to_string())
        .bind(CANCELLED_MESSAGE)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn query_pending(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE status = 'pending'
            ORDER BY priority DESC, created_at ASC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn query_by_status(&self, status: JobStatus, limit: u32) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE status = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn jobs_for_subject(&self, subject_id: &str) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE subject_id = ?1 ORDER BY created_at DESC",
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => counts.pending = n as u64,
                Some(JobStatus::Processing) => counts.processing = n as u64,
                Some(JobStatus::Completed) => counts.completed = n as u64,
                Some(JobStatus::Failed) => counts.failed = n as u64,
                None => {
                    return Err(StoreError::CorruptRecord(format!(
                        "unknown status '{status}' in counts"
                    )))
                }
            }
        }
        Ok(counts)
    }

    async fn average_processing_ms(&self) -> Result<Option<f64>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT AVG(
                (julianday(completed_at) - julianday(started_at)) * 86400000.0
            ) AS avg_ms
            FROM jobs
            WHERE status = 'completed'
              AND started_at IS NOT NULL
              AND completed_at IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<Option<f64>, _>("avg_ms")?)
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[JobStatus],
    ) -> Result<u64, StoreError> {
        // Status list is bounded by the enum, so building the IN list
        // inline is safe.
        let placeholders: Vec<String> = statuses
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect();
        let sql = format!(
            "DELETE FROM jobs WHERE created_at < ?1 AND status IN ({})",
            placeholders.join(", ")
        );

        let result = sqlx::query(&sql).bind(cutoff).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
