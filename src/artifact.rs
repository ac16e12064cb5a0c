//! Artifact model for generated script drafts.
//!
//! An [`Artifact`] is the output of one generation attempt: a structured
//! script draft with a hook, titled sections, and publishing metadata.
//! The quality gate evaluates artifacts as plain values; nothing in this
//! module performs I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One section of a script draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Section heading shown in outlines.
    pub heading: String,
    /// Narration / body text for this section.
    pub body: String,
    /// Estimated spoken duration of this section in seconds.
    pub estimated_seconds: u32,
}

impl Section {
    /// Creates a new section.
    pub fn new(heading: impl Into<String>, body: impl Into<String>, estimated_seconds: u32) -> Self {
        Self {
            heading: heading.into(),
            body: body.into(),
            estimated_seconds,
        }
    }

    /// Returns the approximate word count of the section body.
    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }
}

/// A generated script draft.
///
/// Produced by the generation collaborator and scored by the quality
/// gate. The draft that survives the regeneration loop is handed to the
/// next pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Title of the piece.
    pub title: String,
    /// Short description used for publishing metadata.
    pub description: String,
    /// Opening hook delivered in the first seconds.
    pub hook: String,
    /// Ordered script sections.
    pub sections: Vec<Section>,
    /// Closing call to action.
    pub call_to_action: String,
    /// Publishing tags.
    pub tags: Vec<String>,
    /// Duration the script was asked to target, in seconds.
    pub target_duration_seconds: u32,
    /// When this draft was generated.
    pub generated_at: DateTime<Utc>,
}

impl Artifact {
    /// Creates an empty draft targeting the given duration.
    pub fn new(title: impl Into<String>, target_duration_seconds: u32) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            hook: String::new(),
            sections: Vec::new(),
            call_to_action: String::new(),
            tags: Vec::new(),
            target_duration_seconds,
            generated_at: Utc::now(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the opening hook.
    pub fn with_hook(mut self, hook: impl Into<String>) -> Self {
        self.hook = hook.into();
        self
    }

    /// Appends a section.
    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    /// Sets the call to action.
    pub fn with_call_to_action(mut self, cta: impl Into<String>) -> Self {
        self.call_to_action = cta.into();
        self
    }

    /// Sets the publishing tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sum of the per-section duration estimates, in seconds.
    pub fn estimated_duration_seconds(&self) -> u32 {
        self.sections.iter().map(|s| s.estimated_seconds).sum()
    }

    /// Total word count across all section bodies.
    pub fn total_word_count(&self) -> usize {
        self.sections.iter().map(Section::word_count).sum()
    }
}
