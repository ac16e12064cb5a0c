//! Content check: section bodies carry enough distinct material.

use std::collections::HashSet;

use crate::artifact::Artifact;

use super::gate::{CheckReport, Issue, Severity};

/// Minimum words per section body before it is flagged as thin.
const MIN_SECTION_WORDS: usize = 20;

/// Checks body substance and heading uniqueness.
pub struct ContentCheck;

impl ContentCheck {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, artifact: &Artifact) -> CheckReport {
        let mut report = CheckReport::with_score(100.0);

        if artifact.sections.is_empty() {
            // Structure reports the critical; content just scores zero.
            report.score = 0.0;
            return report;
        }

        for (index, section) in artifact.sections.iter().enumerate() {
            let words = section.word_count();
            if words > 0 && words < MIN_SECTION_WORDS {
                report.deduct(15.0);
                report.issue(Issue::error(
                    format!("sections[{index}].body"),
                    format!("Section has only {words} words; at least {MIN_SECTION_WORDS} expected"),
                    Severity::Major,
                ));
                report.suggest(format!(
                    "Expand section '{}' with concrete detail",
                    section.heading
                ));
            }

            let trimmed = section.body.trim();
            if !trimmed.is_empty() && !trimmed.ends_with(['.', '!', '?']) {
                report.issue(Issue::warning(
                    format!("sections[{index}].body"),
                    "Section body does not end with a complete sentence",
                ));
            }
        }

        let mut seen = HashSet::new();
        for (index, section) in artifact.sections.iter().enumerate() {
            let normalized = section.heading.trim().to_lowercase();
            if !normalized.is_empty() && !seen.insert(normalized) {
                report.deduct(10.0);
                report.issue(Issue::error(
                    format!("sections[{index}].heading"),
                    format!("Duplicate section heading '{}'", section.heading),
                    Severity::Minor,
                ));
            }
        }

        report
    }
}

impl Default for ContentCheck {
    fn default() -> Self {
        Self::new()
    }
}
