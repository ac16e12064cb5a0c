//! Metadata check: publishing fields are present and sized sensibly.

use crate::artifact::Artifact;

use super::gate::{CheckReport, Issue, Severity};

const MAX_TITLE_CHARS: usize = 100;
const MIN_DESCRIPTION_CHARS: usize = 50;
const MAX_DESCRIPTION_CHARS: usize = 5000;
const MAX_TAGS: usize = 20;

/// Checks title, description and tags.
pub struct MetadataCheck;

impl MetadataCheck {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, artifact: &Artifact) -> CheckReport {
        let mut report = CheckReport::with_score(100.0);

        let title = artifact.title.trim();
        if title.is_empty() {
            report.score = 0.0;
            report.issue(Issue::error("title", "Title is empty", Severity::Critical));
        } else if title.chars().count() > MAX_TITLE_CHARS {
            report.deduct(20.0);
            report.issue(Issue::error(
                "title",
                format!("Title exceeds {MAX_TITLE_CHARS} characters"),
                Severity::Major,
            ));
            report.suggest("Shorten the title to fit platform limits");
        }

        let description = artifact.description.trim();
        if description.is_empty() {
            report.deduct(25.0);
            report.issue(Issue::error(
                "description",
                "Description is empty",
                Severity::Major,
            ));
            report.suggest("Add a one-paragraph description for publishing");
        } else if description.chars().count() < MIN_DESCRIPTION_CHARS {
            report.deduct(10.0);
            report.issue(Issue::error(
                "description",
                format!("Description is shorter than {MIN_DESCRIPTION_CHARS} characters"),
                Severity::Minor,
            ));
        } else if description.chars().count() > MAX_DESCRIPTION_CHARS {
            report.deduct(10.0);
            report.issue(Issue::error(
                "description",
                format!("Description exceeds {MAX_DESCRIPTION_CHARS} characters"),
                Severity::Minor,
            ));
        }

        if artifact.tags.is_empty() {
            report.deduct(10.0);
            report.issue(Issue::error("tags", "No tags provided", Severity::Minor));
            report.suggest("Add a handful of topical tags");
        } else if artifact.tags.len() > MAX_TAGS {
            report.deduct(10.0);
            report.issue(Issue::error(
                "tags",
                format!("{} tags provided; at most {MAX_TAGS} expected", artifact.tags.len()),
                Severity::Minor,
            ));
        }

        report
    }
}

impl Default for MetadataCheck {
    fn default() -> Self {
        Self::new()
    }
}
