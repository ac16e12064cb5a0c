//! Gate types and the weighted evaluation pipeline.

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;

use super::content::ContentCheck;
use super::engagement::EngagementCheck;
use super::metadata::MetadataCheck;
use super::structure::StructureCheck;
use super::technical::TechnicalCheck;

/// Default minimum overall score required to pass the gate.
const DEFAULT_MINIMUM_SCORE: f64 = 70.0;

/// Check weights. Must sum to 1.0.
const STRUCTURE_WEIGHT: f64 = 0.25;
const CONTENT_WEIGHT: f64 = 0.25;
const METADATA_WEIGHT: f64 = 0.20;
const ENGAGEMENT_WEIGHT: f64 = 0.15;
const TECHNICAL_WEIGHT: f64 = 0.15;

/// Severity of a detected issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fails the gate regardless of score.
    Critical,
    Major,
    Minor,
}

/// Whether an issue is a hard error or an advisory warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Error,
    Warning,
}

/// One issue found by a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    /// Artifact field the issue concerns (e.g. "sections", "title").
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

impl Issue {
    /// Creates an error-kind issue.
    pub fn error(field: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            kind: IssueKind::Error,
            field: field.into(),
            message: message.into(),
            severity,
        }
    }

    /// Creates a warning-kind issue.
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: IssueKind::Warning,
            field: field.into(),
            message: message.into(),
            severity: Severity::Minor,
        }
    }
}

/// Result of one sub-check.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// Sub-score, 0-100.
    pub score: f64,
    pub issues: Vec<Issue>,
    pub suggestions: Vec<String>,
}

impl CheckReport {
    /// Creates a report with the given score and nothing else.
    pub fn with_score(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 100.0),
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Deducts points, clamping at zero.
    pub fn deduct(&mut self, points: f64) {
        self.score = (self.score - points).max(0.0);
    }

    /// Records an issue.
    pub fn issue(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    /// Records a suggestion.
    pub fn suggest(&mut self, suggestion: impl Into<String>) {
        self.suggestions.push(suggestion.into());
    }
}

/// Per-check sub-scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub structure: f64,
    pub content: f64,
    pub metadata: f64,
    pub engagement: f64,
    pub technical: f64,
}

/// Outcome of evaluating one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Weighted composite score, 0-100.
    pub score: f64,
    /// True only if `score >= minimum_score` and no critical issue is
    /// present.
    pub is_valid: bool,
    /// All issues, in check order.
    pub issues: Vec<Issue>,
    /// All suggestions, in check order.
    pub suggestions: Vec<String>,
    /// Per-check sub-scores.
    pub breakdown: ScoreBreakdown,
}

impl ValidationResult {
    /// Returns whether any issue is critical.
    pub fn has_critical_issue(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }
}

/// Which sub-system under-performed, for regeneration biasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusArea {
    Structure,
    Content,
    Metadata,
    Engagement,
    Technical,
}

/// Concrete parameter adjustments for the next attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamOverrides {
    /// Adjusted target duration, if the draft missed the duration band.
    pub target_duration_seconds: Option<u32>,
    /// Adjusted section count, if the structure was off.
    pub section_count: Option<u32>,
}

/// Hints handed to the generator for a regeneration attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerationHints {
    /// Under-performing areas, worst first.
    pub focus_areas: Vec<FocusArea>,
    /// Concrete parameter adjustments.
    pub overrides: ParamOverrides,
}

/// Configuration for the quality gate.
#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    /// Minimum overall score required to pass (0-100).
    pub minimum_score: f64,
    /// Minimum number of sections in a well-formed draft.
    pub min_sections: u32,
    /// Maximum number of sections in a well-formed draft.
    pub max_sections: u32,
    /// Acceptable deviation of the estimated duration from the target,
    /// as a fraction (0.2 = ±20%).
    pub duration_tolerance: f64,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            minimum_score: DEFAULT_MINIMUM_SCORE,
            min_sections: 3,
            max_sections: 12,
            duration_tolerance: 0.2,
        }
    }
}

/// Scores artifacts and decides pass / regenerate.
pub struct QualityGate {
    config: QualityGateConfig,
    structure: StructureCheck,
    content: ContentCheck,
    metadata: MetadataCheck,
    engagement: EngagementCheck,
    technical: TechnicalCheck,
}

impl QualityGate {
    /// Creates a gate with the given configuration.
    pub fn new(config: QualityGateConfig) -> Self {
        let structure = StructureCheck::new(config.min_sections, config.max_sections);
        let technical = TechnicalCheck::new(config.duration_tolerance);
        Self {
            config,
            structure,
            content: ContentCheck::new(),
            metadata: MetadataCheck::new(),
            engagement: EngagementCheck::new(),
            technical,
        }
    }

    /// Returns the configured minimum passing score.
    pub fn minimum_score(&self) -> f64 {
        self.config.minimum_score
    }

    /// Runs all checks and combines them into a weighted result.
    pub fn evaluate(&self, artifact: &Artifact) -> ValidationResult {
        let structure = self.structure.evaluate(artifact);
        let content = self.content.evaluate(artifact);
        let metadata = self.metadata.evaluate(artifact);
        let engagement = self.engagement.evaluate(artifact);
        let technical = self.technical.evaluate(artifact);

        let breakdown = ScoreBreakdown {
            structure: structure.score,
            content: content.score,
            metadata: metadata.score,
            engagement: engagement.score,
            technical: technical.score,
        };

        let score = STRUCTURE_WEIGHT * breakdown.structure
            + CONTENT_WEIGHT * breakdown.content
            + METADATA_WEIGHT * breakdown.metadata
            + ENGAGEMENT_WEIGHT * breakdown.engagement
            + TECHNICAL_WEIGHT * breakdown.technical;

        let mut issues = Vec::new();
        let mut suggestions = Vec::new();
        for report in [structure, content, metadata, engagement, technical] {
            issues.extend(report.issues);
            suggestions.extend(report.suggestions);
        }

        let has_critical = issues.iter().any(|i| i.severity == Severity::Critical);
        let is_valid = score >= self.config.minimum_score && !has_critical;

        ValidationResult {
            score,
            is_valid,
            issues,
            suggestions,
            breakdown,
        }
    }

    /// Returns whether the artifact should be regenerated: the score is
    /// below the minimum or a critical issue is present.
    pub fn should_regenerate(&self, result: &ValidationResult) -> bool {
        result.score < self.config.minimum_score || result.has_critical_issue()
    }

    /// Derives which areas under-performed and proposes concrete
    /// parameter adjustments for the next attempt.
    pub fn regeneration_hints(
        &self,
        result: &ValidationResult,
        artifact: &Artifact,
    ) -> RegenerationHints {
        let mut scored: Vec<(FocusArea, f64)> = vec![
            (FocusArea::Structure, result.breakdown.structure),
            (FocusArea::Content, result.breakdown.content),
            (FocusArea::Metadata, result.breakdown.metadata),
            (FocusArea::Engagement, result.breakdown.engagement),
            (FocusArea::Technical, result.breakdown.technical),
        ];
        scored.retain(|(_, score)| *score < self.config.minimum_score);
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let focus_areas: Vec<FocusArea> = scored.into_iter().map(|(area, _)| area).collect();

        let mut overrides = ParamOverrides::default();

        // Structure off target: nudge the section count into the
        // configured band.
        let section_count = artifact.sections.len() as u32;
        if focus_areas.contains(&FocusArea::Structure) {
            if section_count < self.config.min_sections {
                overrides.section_count = Some(self.config.min_sections.max(section_count + 2));
            } else if section_count > self.config.max_sections {
                overrides.section_count = Some(self.config.max_sections);
            }
        }

        // Duration out of band: ask for the midpoint between the
        // estimate and the original target so the next draft converges.
        if focus_areas.contains(&FocusArea::Technical) {
            let target = artifact.target_duration_seconds;
            let estimated = artifact.estimated_duration_seconds();
            if target > 0 {
                let deviation = (estimated as f64 - target as f64).abs() / target as f64;
                if deviation > self.config.duration_tolerance {
                    overrides.target_duration_seconds = Some((estimated + target) / 2);
                }
            }
        }

        RegenerationHints {
            focus_areas,
            overrides,
        }
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(QualityGateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Section;

    /// A draft that should sail through every check.
    fn good_artifact() -> Artifact {
        let body = "In this section we walk through a concrete and carefully measured \
                    explanation of the topic with plenty of supporting detail so the \
                    narration lands at a natural speaking pace for the audience.";
        Artifact::new("Ten surprising facts about deep sea life", 180)
            .with_description(
                "A tour of the strangest creatures of the deep ocean, from anglerfish \
                 to giant isopods, and what their adaptations teach us.",
            )
            .with_hook("What lives five miles below the surface?")
            .with_section(Section::new("The midnight zone", body, 60))
            .with_section(Section::new("Bioluminescence", body, 60))
            .with_section(Section::new("Pressure adaptations", body, 60))
            .with_call_to_action("Subscribe for more ocean science")
            .with_tags(vec!["ocean".to_string(), "science".to_string()])
    }

    #[test]
    fn test_good_artifact_passes() {
        let gate = QualityGate::default();
        let result = gate.evaluate(&good_artifact());

        assert!(
            result.is_valid,
            "expected pass, got score {} with issues {:?}",
            result.score, result.issues
        );
        assert!(!gate.should_regenerate(&result));
    }

    #[test]
    fn test_validity_invariant() {
        let gate = QualityGate::default();

        for artifact in [good_artifact(), Artifact::new("", 180)] {
            let result = gate.evaluate(&artifact);
            let expected =
                result.score >= gate.minimum_score() && !result.has_critical_issue();
            assert_eq!(result.is_valid, expected);
        }
    }

    #[test]
    fn test_empty_artifact_fails_with_critical() {
        let gate = QualityGate::default();
        let result = gate.evaluate(&Artifact::new("", 180));

        assert!(!result.is_valid);
        assert!(result.has_critical_issue());
        assert!(gate.should_regenerate(&result));
    }

    #[test]
    fn test_critical_issue_fails_even_with_high_score() {
        // A draft that is fine everywhere except it has no sections at
        // all: the structural critical must fail the gate even if the
        // weighted score were above the minimum.
        let gate = QualityGate::new(QualityGateConfig {
            minimum_score: 10.0,
            ..QualityGateConfig::default()
        });
        let mut artifact = good_artifact();
        artifact.sections.clear();

        let result = gate.evaluate(&artifact);
        assert!(result.has_critical_issue());
        assert!(!result.is_valid);
    }

    #[test]
    fn test_hints_for_too_few_sections() {
        let gate = QualityGate::default();
        let mut artifact = good_artifact();
        artifact.sections.truncate(1);

        let result = gate.evaluate(&artifact);
        let hints = gate.regeneration_hints(&result, &artifact);

        assert!(hints.focus_areas.contains(&FocusArea::Structure));
        assert_eq!(hints.overrides.section_count, Some(3));
    }

    #[test]
    fn test_hints_for_duration_out_of_band() {
        let gate = QualityGate::default();
        let mut artifact = good_artifact();
        // Estimated 180s against a 600s target: far below the band.
        artifact.target_duration_seconds = 600;

        let result = gate.evaluate(&artifact);
        let hints = gate.regeneration_hints(&result, &artifact);

        assert!(hints.focus_areas.contains(&FocusArea::Technical));
        assert_eq!(hints.overrides.target_duration_seconds, Some((180 + 600) / 2));
    }

    #[test]
    fn test_hints_empty_when_passing() {
        let gate = QualityGate::default();
        let artifact = good_artifact();
        let result = gate.evaluate(&artifact);

        let hints = gate.regeneration_hints(&result, &artifact);
        assert!(hints.focus_areas.is_empty());
        assert_eq!(hints.overrides, ParamOverrides::default());
    }

    #[test]
    fn test_breakdown_weights_sum_to_overall() {
        let gate = QualityGate::default();
        let result = gate.evaluate(&good_artifact());

        let recomputed = 0.25 * result.breakdown.structure
            + 0.25 * result.breakdown.content
            + 0.20 * result.breakdown.metadata
            + 0.15 * result.breakdown.engagement
            + 0.15 * result.breakdown.technical;
        assert!((result.score - recomputed).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_is_pure() {
        let gate = QualityGate::default();
        let artifact = good_artifact();

        let first = gate.evaluate(&artifact);
        let second = gate.evaluate(&artifact);
        assert_eq!(first.score, second.score);
        assert_eq!(first.issues, second.issues);
    }
}
