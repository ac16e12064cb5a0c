//! Generation collaborator interface.
//!
//! The orchestration core never produces content itself; it calls an
//! external scripting service through the [`Generator`] trait. The
//! service may itself go through the rate limiter before issuing
//! upstream calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::Artifact;
use crate::pipeline::SubjectSnapshot;
use crate::quality::RegenerationHints;

/// Errors surfaced by the generation collaborator.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The upstream service rejected or failed the request.
    #[error("Generation failed: {0}")]
    Failed(String),

    /// The upstream service is rate limited and did not recover.
    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),

    /// The response could not be interpreted as a script draft.
    #[error("Invalid generation response: {0}")]
    InvalidResponse(String),
}

/// Parameters for one generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Desired spoken duration in seconds.
    pub target_duration_seconds: u32,
    /// Desired number of script sections.
    pub section_count: u32,
    /// Free-form style directive (e.g. "documentary", "listicle").
    pub style: Option<String>,
    /// Free-form tone directive (e.g. "energetic").
    pub tone: Option<String>,
    /// Opaque passthrough for collaborator-specific options.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            target_duration_seconds: 180,
            section_count: 5,
            style: None,
            tone: None,
            extra: serde_json::Value::Null,
        }
    }
}

impl GenerationParams {
    /// Creates parameters targeting the given duration.
    pub fn new(target_duration_seconds: u32, section_count: u32) -> Self {
        Self {
            target_duration_seconds,
            section_count,
            ..Default::default()
        }
    }

    /// Sets the style directive.
    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    /// Sets the tone directive.
    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = Some(tone.into());
        self
    }

    /// Applies the parameter overrides from a set of regeneration hints.
    pub fn apply_hints(mut self, hints: &RegenerationHints) -> Self {
        if let Some(duration) = hints.overrides.target_duration_seconds {
            self.target_duration_seconds = duration;
        }
        if let Some(sections) = hints.overrides.section_count {
            self.section_count = sections;
        }
        self
    }
}

/// External collaborator that turns a subject into a script draft.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generates a draft for the given subject.
    async fn generate(
        &self,
        subject: &SubjectSnapshot,
        params: &GenerationParams,
    ) -> Result<Artifact, GenerationError>;

    /// Regenerates a draft, biased by hints from the quality gate.
    ///
    /// The default implementation applies the hints' parameter
    /// overrides and delegates to [`Generator::generate`].
    async fn regenerate(
        &self,
        subject: &SubjectSnapshot,
        params: &GenerationParams,
        hints: &RegenerationHints,
    ) -> Result<Artifact, GenerationError> {
        let adjusted = params.clone().apply_hints(hints);
        self.generate(subject, &adjusted).await
    }
}
