//! Technical check: timing estimates are coherent with the target.

use crate::artifact::Artifact;

use super::gate::{CheckReport, Issue, Severity};

/// Deduction when the estimated duration misses the target band. Large
/// enough to pull the sub-score below a default passing threshold on
/// its own.
const DURATION_BAND_PENALTY: f64 = 35.0;

/// Checks duration estimates against the requested target.
pub struct TechnicalCheck {
    /// Acceptable fractional deviation from the target duration.
    tolerance: f64,
}

impl TechnicalCheck {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn evaluate(&self, artifact: &Artifact) -> CheckReport {
        let mut report = CheckReport::with_score(100.0);

        if artifact.sections.is_empty() {
            report.score = 0.0;
            return report;
        }

        for (index, section) in artifact.sections.iter().enumerate() {
            if section.estimated_seconds == 0 {
                report.deduct(10.0);
                report.issue(Issue::error(
                    format!("sections[{index}].estimated_seconds"),
                    "Section has no duration estimate",
                    Severity::Major,
                ));
            }
        }

        let target = artifact.target_duration_seconds;
        let estimated = artifact.estimated_duration_seconds();
        if target > 0 && estimated > 0 {
            let deviation = (estimated as f64 - target as f64).abs() / target as f64;
            if deviation > self.tolerance {
                report.deduct(DURATION_BAND_PENALTY);
                report.issue(Issue::error(
                    "sections",
                    format!(
                        "Estimated duration {estimated}s deviates {:.0}% from the {target}s target",
                        deviation * 100.0
                    ),
                    Severity::Major,
                ));
                if estimated < target {
                    report.suggest("Lengthen sections to approach the target duration");
                } else {
                    report.suggest("Tighten sections to approach the target duration");
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Section;

    fn check() -> TechnicalCheck {
        TechnicalCheck::new(0.2)
    }

    #[test]
    fn test_on_target_scores_full() {
        let artifact = Artifact::new("Title", 120)
            .with_section(Section::new("A", "body.", 60))
            .with_section(Section::new("B", "body.", 60));

        let report = check().evaluate(&artifact);
        assert_eq!(report.score, 100.0);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_within_tolerance_scores_full() {
        // 110s against a 120s target is inside the 20% band.
        let artifact = Artifact::new("Title", 120)
            .with_section(Section::new("A", "body.", 55))
            .with_section(Section::new("B", "body.", 55));

        let report = check().evaluate(&artifact);
        assert_eq!(report.score, 100.0);
    }

    #[test]
    fn test_too_short_penalized_with_suggestion() {
        let artifact = Artifact::new("Title", 300).with_section(Section::new("A", "body.", 60));

        let report = check().evaluate(&artifact);
        assert_eq!(report.score, 65.0);
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.contains("Lengthen")));
    }

    #[test]
    fn test_too_long_penalized_with_suggestion() {
        let artifact = Artifact::new("Title", 60).with_section(Section::new("A", "body.", 200));

        let report = check().evaluate(&artifact);
        assert_eq!(report.score, 65.0);
        assert!(report.suggestions.iter().any(|s| s.contains("Tighten")));
    }

    #[test]
    fn test_zero_estimate_section_penalized() {
        let artifact = Artifact::new("Title", 60)
            .with_section(Section::new("A", "body.", 60))
            .with_section(Section::new("B", "body.", 0));

        let report = check().evaluate(&artifact);
        assert!(report
            .issues
            .iter()
            .any(|i| i.field == "sections[1].estimated_seconds"));
    }

    #[test]
    fn test_no_sections_scores_zero() {
        let report = check().evaluate(&Artifact::new("Title", 60));
        assert_eq!(report.score, 0.0);
    }
}
