//! Parsing and validation of raw reviewer output.
//!
//! The reviewer returns loosely structured text: ideally a JSON object with
//! three finding arrays and a summary, but possibly wrapped in markdown code
//! fences, missing keys, or not JSON at all. This module recovers a valid
//! [`AnalysisResult`] from every shape:
//!
//! - fenced JSON is unwrapped before parsing
//! - missing arrays default to empty, a missing summary to a placeholder
//! - unparseable or empty output becomes a degraded result carrying a
//!   single synthetic advisory finding (degraded results are never cached)

use serde_json::Value;

use crate::models::{AnalysisResult, Finding, Severity, FIRST_SEEN_CURRENT};

/// Placeholder used when the reviewer omits the summary key.
const MISSING_SUMMARY: &str = "No summary provided by the reviewer.";

/// Sentinel file attached to synthetic findings that describe a pipeline
/// condition rather than a location in the diff.
const SYSTEM_FILE: &str = "system";

/// Outcome of parsing one reviewer response.
#[derive(Debug, Clone)]
pub struct ParsedReview {
    pub result: AnalysisResult,
    /// True when the output could not be parsed and `result` is the
    /// synthetic advisory shape. Degraded results must not be cached.
    pub degraded: bool,
}

/// Parse a raw reviewer response into a structured analysis result.
pub fn parse_review_output(raw: &str) -> ParsedReview {
    let stripped = strip_code_fences(raw);
    if stripped.is_empty() {
        return degraded("the reviewer returned an empty response");
    }

    let value: Value = match serde_json::from_str(stripped) {
        Ok(v) => v,
        Err(_) => return degraded("the reviewer response was not valid JSON"),
    };

    if !value.is_object() {
        return degraded("the reviewer response was not a JSON object");
    }

    let result = AnalysisResult {
        security_issues: findings_array(&value, "security_issues"),
        code_quality_issues: findings_array(&value, "code_quality_issues"),
        performance_issues: findings_array(&value, "performance_issues"),
        summary: value
            .get("summary")
            .and_then(|s| s.as_str())
            .unwrap_or(MISSING_SUMMARY)
            .to_string(),
    };

    ParsedReview {
        result,
        degraded: false,
    }
}

/// Unwrap markdown code fences around a JSON payload.
fn strip_code_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Extract one category's finding array, tolerating a missing key or
/// malformed elements.
fn findings_array(value: &Value, key: &str) -> Vec<Finding> {
    let Some(items) = value.get(key).and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    items.iter().filter_map(normalize_finding).collect()
}

/// Normalize one raw finding object.
///
/// A finding without a description carries no reviewable content and is
/// dropped. Everything else is repaired: unknown severities clamp to
/// medium, a missing file becomes the PR-metadata sentinel.
fn normalize_finding(item: &Value) -> Option<Finding> {
    let description = item.get("description")?.as_str()?.trim();
    if description.is_empty() {
        return None;
    }

    let severity = item
        .get("severity")
        .and_then(|s| s.as_str())
        .map(Severity::from_label)
        .unwrap_or(Severity::Medium);

    let file = item
        .get("file")
        .and_then(|f| f.as_str())
        .filter(|f| !f.trim().is_empty())
        .unwrap_or("PR metadata");

    let suggestion = item
        .get("suggestion")
        .and_then(|s| s.as_str())
        .unwrap_or_default();

    Some(Finding {
        severity,
        description: description.to_string(),
        file: file.to_string(),
        suggestion: suggestion.to_string(),
        first_seen: FIRST_SEEN_CURRENT.to_string(),
        identity: String::new(),
    })
}

/// Build the degraded result returned when output cannot be parsed.
fn degraded(reason: &str) -> ParsedReview {
    let advisory = Finding {
        severity: Severity::Medium,
        description: format!(
            "The automated review could not be completed: {reason}. \
             The diff itself was not analyzed."
        ),
        file: SYSTEM_FILE.to_string(),
        suggestion: "Re-run the analysis; if this persists, check the reviewer configuration."
            .to_string(),
        first_seen: FIRST_SEEN_CURRENT.to_string(),
        identity: String::new(),
    };

    ParsedReview {
        result: AnalysisResult {
            security_issues: Vec::new(),
            code_quality_issues: vec![advisory],
            performance_issues: Vec::new(),
            summary: "Automated review unavailable for this run.".to_string(),
        },
        degraded: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = r#"{
        "security_issues": [
            {"severity": "high", "description": "SQL injection in query builder", "file": "db.py", "suggestion": "use parameterized queries"}
        ],
        "code_quality_issues": [],
        "performance_issues": [],
        "summary": "ok"
    }"#;

    #[test]
    fn parses_well_formed_output() {
        let parsed = parse_review_output(WELL_FORMED);
        assert!(!parsed.degraded);
        assert_eq!(parsed.result.security_issues.len(), 1);
        assert_eq!(parsed.result.summary, "ok");

        let finding = &parsed.result.security_issues[0];
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.file, "db.py");
        assert_eq!(finding.first_seen, "current");
    }

    #[test]
    fn strips_markdown_fences() {
        let fenced = format!("```json\n{WELL_FORMED}\n```");
        let parsed = parse_review_output(&fenced);
        assert!(!parsed.degraded);
        assert_eq!(parsed.result.security_issues.len(), 1);

        let bare_fence = format!("```\n{WELL_FORMED}\n```");
        let parsed = parse_review_output(&bare_fence);
        assert!(!parsed.degraded);
    }

    #[test]
    fn missing_keys_default_without_degrading() {
        let parsed = parse_review_output(r#"{"security_issues": []}"#);
        assert!(!parsed.degraded);
        assert!(parsed.result.code_quality_issues.is_empty());
        assert!(parsed.result.performance_issues.is_empty());
        assert_eq!(parsed.result.summary, MISSING_SUMMARY);
    }

    #[test]
    fn empty_output_degrades() {
        let parsed = parse_review_output("");
        assert!(parsed.degraded);
        assert_eq!(parsed.result.code_quality_issues.len(), 1);
        assert_eq!(parsed.result.code_quality_issues[0].file, "system");
        assert!(parsed.result.security_issues.is_empty());
        assert!(parsed.result.performance_issues.is_empty());
    }

    #[test]
    fn non_json_output_degrades() {
        let parsed = parse_review_output("I couldn't review this PR, sorry!");
        assert!(parsed.degraded);
        assert_eq!(parsed.result.code_quality_issues.len(), 1);
    }

    #[test]
    fn json_array_degrades() {
        let parsed = parse_review_output(r#"[{"severity": "high"}]"#);
        assert!(parsed.degraded);
    }

    #[test]
    fn malformed_findings_are_repaired_or_dropped() {
        let raw = r#"{
            "security_issues": [
                {"severity": "catastrophic", "description": "weird severity"},
                {"severity": "high"},
                {"description": "   "}
            ],
            "summary": "partial"
        }"#;
        let parsed = parse_review_output(raw);
        assert!(!parsed.degraded);

        // Only the finding with a usable description survives.
        assert_eq!(parsed.result.security_issues.len(), 1);
        let finding = &parsed.result.security_issues[0];
        assert_eq!(finding.severity, Severity::Medium);
        assert_eq!(finding.file, "PR metadata");
    }
}
