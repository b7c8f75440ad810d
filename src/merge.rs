//! Reconciliation of fresh reviewer output against recorded history.
//!
//! The reviewer's severity judgment is nondeterministic across calls, but
//! the displayed severity of a recurring complaint must not flip between
//! analyses of the same pull request. Merging therefore overwrites each
//! recognized finding's severity and first-seen marker with the recorded
//! values, and registers every unrecognized finding as new. The tradeoff is
//! that a genuinely worsened instance of the same textual complaint is not
//! re-escalated until it is explicitly resolved.

use crate::history::HistoryTracker;
use crate::identity::finding_identity;
use crate::models::{Category, Finding, ScopeKey, FIRST_SEEN_CURRENT};

/// Merge one category's findings against the scope's history, in input
/// order.
///
/// Recognized identities inherit the recorded severity and first-seen
/// marker; description, file, and suggestion always come from the latest
/// reviewer output. Unrecognized findings are stamped `first_seen =
/// "current"` and recorded. Each output finding carries its identity for
/// the UI's resolve action.
pub fn merge_findings(
    findings: Vec<Finding>,
    category: Category,
    scope: &ScopeKey,
    history: &HistoryTracker,
) -> Vec<Finding> {
    let mut merged = Vec::with_capacity(findings.len());

    for mut finding in findings {
        let identity = finding_identity(&finding.file, &finding.description);

        match history.lookup(scope, &identity) {
            Some(entry) => {
                finding.severity = entry.severity;
                finding.first_seen = entry.first_seen;
            }
            None => {
                finding.first_seen = FIRST_SEEN_CURRENT.to_string();
                history.record(scope, &identity, finding.severity, category, &finding.first_seen);
            }
        }

        finding.identity = identity;
        merged.push(finding);
    }

    merged
}
