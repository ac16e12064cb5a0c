//! Quality gate for generated script drafts.
//!
//! Five independent checks (structure, content, metadata, engagement,
//! technical) each score an artifact 0-100 and report issues. The gate
//! combines them into a weighted overall score and decides whether the
//! draft passes or must be regenerated. All checks are pure functions
//! over the artifact: no side effects, no I/O.

mod content;
mod engagement;
mod gate;
mod metadata;
mod structure;
mod technical;

pub use gate::{
    CheckReport, FocusArea, Issue, IssueKind, ParamOverrides, QualityGate, QualityGateConfig,
    RegenerationHints, ScoreBreakdown, Severity, ValidationResult,
};
