//! Records tracked by the pipeline controller.
//!
//! Each record moves through a stage lifecycle owned by an external
//! catalog; the controller only reads and advances the stage field
//! through the accessor trait below.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by catalog access.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// No record exists with the given identifier.
    #[error("Subject not found: {0}")]
    NotFound(String),

    /// The backing catalog failed.
    #[error("Catalog access failed: {0}")]
    Backend(String),
}

/// Stage of a record within the generation pipeline.
///
/// Transitions are linear (`Selected` → `Generating` → `Generated` →
/// `Approved`); a failed generation normally reverts the record to
/// `Selected` so it stays eligible for another attempt. A record whose
/// jobs keep exhausting their attempts is parked in `Failed` so the
/// sweep stops burning generation budget on it; an operator re-drives
/// it with an explicit trigger or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Picked for generation but not yet handed to the queue.
    Selected,
    /// A generation job is active for this record.
    Generating,
    /// A draft passed the quality gate and awaits review.
    Generated,
    /// Accepted by review; out of the pipeline's hands.
    Approved,
    /// Repeatedly exhausted its attempt budget; parked until an
    /// operator intervenes.
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Selected => "selected",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Approved => "approved",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a catalog record, captured at job creation time
/// and carried through generation so the worker never re-reads the
/// catalog mid-flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectSnapshot {
    /// Catalog identifier.
    pub id: String,
    /// Human-readable name for the subject.
    pub name: String,
    /// Free-form source material for the generator.
    pub summary: String,
    /// Current pipeline stage at capture time.
    pub status: RecordStatus,
    /// When the record entered its current stage.
    pub stage_changed_at: DateTime<Utc>,
}

impl SubjectSnapshot {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            summary: String::new(),
            status: RecordStatus::Selected,
            stage_changed_at: Utc::now(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }
}

/// Access to the catalog the pipeline advances records through.
///
/// The controller is the only writer of stage transitions; the catalog
/// itself lives elsewhere and may be backed by anything from an
/// in-memory map to a remote service.
#[async_trait]
pub trait SubjectAccessor: Send + Sync {
    /// Fetches a record by identifier.
    async fn get_subject(&self, id: &str) -> Result<SubjectSnapshot, CatalogError>;

    /// Moves a record to a new stage.
    async fn set_status(&self, id: &str, status: RecordStatus) -> Result<(), CatalogError>;

    /// Lists records currently in the given stage, oldest stage change
    /// first, up to `limit`.
    async fn list_in_status(
        &self,
        status: RecordStatus,
        limit: usize,
    ) -> Result<Vec<SubjectSnapshot>, CatalogError>;
}
