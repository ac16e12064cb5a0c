//! Engagement check: the draft opens strong and closes with an ask.

use crate::artifact::Artifact;

use super::gate::{CheckReport, Issue, Severity};

const MIN_HOOK_CHARS: usize = 10;

/// Checks the opening hook and the call to action.
pub struct EngagementCheck;

impl EngagementCheck {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, artifact: &Artifact) -> CheckReport {
        let mut report = CheckReport::with_score(100.0);

        let hook = artifact.hook.trim();
        if hook.is_empty() {
            report.deduct(40.0);
            report.issue(Issue::error("hook", "Opening hook is missing", Severity::Major));
            report.suggest("Open with a question or striking fact in the first seconds");
        } else {
            if hook.chars().count() < MIN_HOOK_CHARS {
                report.deduct(15.0);
                report.issue(Issue::error(
                    "hook",
                    format!("Hook is shorter than {MIN_HOOK_CHARS} characters"),
                    Severity::Minor,
                ));
            }
            // Questions and numbers measurably outperform flat openers.
            let has_question = hook.contains('?');
            let has_number = hook.chars().any(|c| c.is_ascii_digit());
            if !has_question && !has_number {
                report.suggest("Consider opening with a question or a concrete number");
            }
        }

        if artifact.call_to_action.trim().is_empty() {
            report.deduct(25.0);
            report.issue(Issue::error(
                "call_to_action",
                "No closing call to action",
                Severity::Major,
            ));
            report.suggest("Close with a clear next step for the audience");
        }

        report
    }
}

impl Default for EngagementCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_hook_penalized() {
        let artifact = Artifact::new("Title", 60).with_call_to_action("Subscribe");
        let report = EngagementCheck::new().evaluate(&artifact);

        assert_eq!(report.score, 60.0);
        assert!(report.issues.iter().any(|i| i.field == "hook"));
    }

    #[test]
    fn test_short_hook_penalized() {
        let artifact = Artifact::new("Title", 60)
            .with_hook("Hi?")
            .with_call_to_action("Subscribe");
        let report = EngagementCheck::new().evaluate(&artifact);

        assert_eq!(report.score, 85.0);
    }

    #[test]
    fn test_missing_cta_penalized() {
        let artifact = Artifact::new("Title", 60).with_hook("What lies beneath the waves?");
        let report = EngagementCheck::new().evaluate(&artifact);

        assert_eq!(report.score, 75.0);
        assert!(report.issues.iter().any(|i| i.field == "call_to_action"));
    }

    #[test]
    fn test_flat_opener_suggestion_only() {
        let artifact = Artifact::new("Title", 60)
            .with_hook("Today we talk about the ocean")
            .with_call_to_action("Subscribe");
        let report = EngagementCheck::new().evaluate(&artifact);

        assert_eq!(report.score, 100.0);
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.contains("question")));
    }

    #[test]
    fn test_strong_engagement_scores_full() {
        let artifact = Artifact::new("Title", 60)
            .with_hook("What lives 5 miles under the sea?")
            .with_call_to_action("Subscribe for more");
        let report = EngagementCheck::new().evaluate(&artifact);

        assert_eq!(report.score, 100.0);
        assert!(report.issues.is_empty());
        assert!(report.suggestions.is_empty());
    }
}
