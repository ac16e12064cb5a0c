//! Structural check: the draft has a sound section skeleton.

use crate::artifact::Artifact;

use super::gate::{CheckReport, Issue, Severity};

/// Points deducted per section missing from the configured minimum.
const MISSING_SECTION_PENALTY: f64 = 20.0;

/// Checks section count and per-section completeness.
pub struct StructureCheck {
    min_sections: u32,
    max_sections: u32,
}

impl StructureCheck {
    pub fn new(min_sections: u32, max_sections: u32) -> Self {
        Self {
            min_sections,
            max_sections,
        }
    }

    pub fn evaluate(&self, artifact: &Artifact) -> CheckReport {
        let mut report = CheckReport::with_score(100.0);

        if artifact.sections.is_empty() {
            report.score = 0.0;
            report.issue(Issue::error(
                "sections",
                "Draft has no sections",
                Severity::Critical,
            ));
            return report;
        }

        let count = artifact.sections.len() as u32;
        if count < self.min_sections {
            let deficit = self.min_sections - count;
            report.deduct(MISSING_SECTION_PENALTY * deficit as f64);
            report.issue(Issue::error(
                "sections",
                format!(
                    "Draft has {count} sections; at least {} expected",
                    self.min_sections
                ),
                Severity::Major,
            ));
            report.suggest(format!(
                "Split the material into at least {} sections",
                self.min_sections
            ));
        } else if count > self.max_sections {
            report.deduct(10.0);
            report.issue(Issue::error(
                "sections",
                format!(
                    "Draft has {count} sections; at most {} expected",
                    self.max_sections
                ),
                Severity::Major,
            ));
            report.suggest("Merge short sections to tighten the outline");
        }

        for (index, section) in artifact.sections.iter().enumerate() {
            if section.body.trim().is_empty() {
                report.deduct(40.0);
                report.issue(Issue::error(
                    format!("sections[{index}].body"),
                    "Section body is empty",
                    Severity::Critical,
                ));
            }
            if section.heading.trim().is_empty() {
                report.deduct(5.0);
                report.issue(Issue::error(
                    format!("sections[{index}].heading"),
                    "Section heading is empty",
                    Severity::Minor,
                ));
            }
        }

        report
    }
}
