//! Job execution.
//!
//! The queue hands a claimed job to a [`JobExecutor`]; the stock
//! implementation, [`GenerationExecutor`], wires together the catalog,
//! the rate limiter, the generation collaborator, and the quality gate:
//! acquire a token, generate a draft, score it, and regenerate once
//! with targeted hints if the first draft falls short.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifact::Artifact;
use crate::generator::{GenerationError, Generator};
use crate::limiter::{AcquireError, RateLimiter};
use crate::pipeline::{CatalogError, SubjectAccessor};
use crate::quality::{QualityGate, ValidationResult};
use crate::queue::Job;

/// Errors from a single execution attempt.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The catalog could not supply the subject.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// A rate limit token could not be acquired.
    #[error(transparent)]
    RateLimited(#[from] AcquireError),

    /// The generation collaborator failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The best draft this attempt produced did not pass the quality
    /// gate.
    #[error("Draft rejected by quality gate (score {score:.1}): {}", issues.join("; "))]
    QualityRejected { score: f64, issues: Vec<String> },

    /// Persisting the accepted draft failed.
    #[error("Failed to store draft: {0}")]
    Sink(String),
}

/// Result of a successful execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// The accepted draft.
    pub artifact: Artifact,
    /// The gate verdict for the accepted draft.
    pub validation: ValidationResult,
}

/// Executes one claimed job to a draft or an error.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<ExecutionReport, ExecutionError>;
}

/// Destination for accepted drafts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn store(
        &self,
        subject_id: &str,
        artifact: &Artifact,
        validation: &ValidationResult,
    ) -> Result<(), String>;
}

/// Executor that generates, gates, and optionally regenerates a draft.
pub struct GenerationExecutor {
    generator: Arc<dyn Generator>,
    gate: QualityGate,
    limiter: Arc<RateLimiter>,
    catalog: Arc<dyn SubjectAccessor>,
    sink: Option<Arc<dyn ArtifactSink>>,
}

impl GenerationExecutor {
    pub fn new(
        generator: Arc<dyn Generator>,
        gate: QualityGate,
        limiter: Arc<RateLimiter>,
        catalog: Arc<dyn SubjectAccessor>,
    ) -> Self {
        Self {
            generator,
            gate,
            limiter,
            catalog,
            sink: None,
        }
    }

    /// Sets a destination for accepted drafts.
    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

#[async_trait]
impl JobExecutor for GenerationExecutor {
    async fn execute(&self, job: &Job) -> Result<ExecutionReport, ExecutionError> {
        let subject = self.catalog.get_subject(&job.subject_id).await?;

        self.limiter
            .acquire(job.priority, Some(&job.subject_id))
            .await?;
        let draft = self.generator.generate(&subject, &job.parameters).await?;
        let mut verdict = self.gate.evaluate(&draft);

        // One in-attempt regeneration pass when the draft falls short
        // but is close enough to be worth steering.
        let hints = self
            .gate
            .should_regenerate(&verdict)
            .then(|| self.gate.regeneration_hints(&verdict, &draft));
        let mut best = (draft, verdict.clone());

        if let Some(hints) = hints {
            debug!(
                subject_id = %job.subject_id,
                score = best.1.score,
                focus = ?hints.focus_areas,
                "Draft below threshold, regenerating with hints"
            );

            self.limiter
                .acquire(job.priority, Some(&job.subject_id))
                .await?;
            match self
                .generator
                .regenerate(&subject, &job.parameters, &hints)
                .await
            {
                Ok(retry_draft) => {
                    let retry_verdict = self.gate.evaluate(&retry_draft);
                    // Keep whichever draft scored higher.
                    if retry_verdict.score > best.1.score {
                        best = (retry_draft, retry_verdict);
                    }
                }
                Err(err) => {
                    warn!(
                        subject_id = %job.subject_id,
                        error = %err,
                        "Regeneration failed, keeping first draft"
                    );
                }
            }
            verdict = best.1.clone();
        }

        if !verdict.is_valid {
            return Err(ExecutionError::QualityRejected {
                score: verdict.score,
                issues: verdict.issues.iter().map(|i| i.message.clone()).collect(),
            });
        }

        let (artifact, validation) = best;
        if let Some(sink) = &self.sink {
            sink.store(&job.subject_id, &artifact, &validation)
                .await
                .map_err(ExecutionError::Sink)?;
        }

        info!(
            subject_id = %job.subject_id,
            score = validation.score,
            "Draft accepted by quality gate"
        );
        Ok(ExecutionReport {
            artifact,
            validation,
        })
    }
}
