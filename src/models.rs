//! Core data models for the review pipeline.
//!
//! These types represent the findings, analysis results, and history state
//! that flow between the reviewer, the merge engine, and the HTTP API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker value a finding carries the first time it is observed.
pub const FIRST_SEEN_CURRENT: &str = "current";

/// Severity assigned to a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// Parse a severity label from reviewer output.
    ///
    /// Unknown labels clamp to `Medium` so a creative model cannot produce
    /// an unrepresentable finding.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" => Severity::High,
            "low" | "info" => Severity::Low,
            _ => Severity::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    /// Points an issue of this severity contributes to a PR's score.
    pub fn points(&self) -> i64 {
        match self {
            Severity::High => 10,
            Severity::Medium => 5,
            Severity::Low => 2,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding category. Analysis results partition findings into one array per
/// category, so individual findings do not carry this on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    CodeQuality,
    Performance,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Security => "security",
            Category::CodeQuality => "code_quality",
            Category::Performance => "performance",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reported review issue.
///
/// `severity` and `first_seen` are authoritative from the history tracker
/// once a matching identity exists; `description`, `file`, and `suggestion`
/// always reflect the latest reviewer output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub description: String,
    pub file: String,
    #[serde(default)]
    pub suggestion: String,
    #[serde(default = "default_first_seen")]
    pub first_seen: String,
    /// Opaque fingerprint correlating this finding across analysis runs.
    /// Filled in by the merge engine; the UI passes it back to resolve.
    #[serde(default)]
    pub identity: String,
}

fn default_first_seen() -> String {
    FIRST_SEEN_CURRENT.to_string()
}

/// The full structured output for one analyzed commit.
///
/// Always contains all three arrays and a summary, even in degraded mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub security_issues: Vec<Finding>,
    #[serde(default)]
    pub code_quality_issues: Vec<Finding>,
    #[serde(default)]
    pub performance_issues: Vec<Finding>,
    #[serde(default)]
    pub summary: String,
}

impl AnalysisResult {
    /// Total number of findings across all three categories.
    pub fn finding_count(&self) -> usize {
        self.security_issues.len() + self.code_quality_issues.len() + self.performance_issues.len()
    }

    /// Iterate over every finding with its category.
    pub fn findings_with_category(&self) -> impl Iterator<Item = (Category, &Finding)> {
        self.security_issues
            .iter()
            .map(|f| (Category::Security, f))
            .chain(
                self.code_quality_issues
                    .iter()
                    .map(|f| (Category::CodeQuality, f)),
            )
            .chain(
                self.performance_issues
                    .iter()
                    .map(|f| (Category::Performance, f)),
            )
    }
}

/// Identifies one pull request's independent history timeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl ScopeKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Tracked state for one finding identity within one pull request scope.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub severity: Severity,
    pub first_seen: String,
    pub category: Category,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_labels_clamp_to_medium() {
        assert_eq!(Severity::from_label("high"), Severity::High);
        assert_eq!(Severity::from_label("CRITICAL"), Severity::High);
        assert_eq!(Severity::from_label("low"), Severity::Low);
        assert_eq!(Severity::from_label("medium"), Severity::Medium);
        assert_eq!(Severity::from_label("banana"), Severity::Medium);
        assert_eq!(Severity::from_label(""), Severity::Medium);
    }

    #[test]
    fn analysis_result_serializes_all_keys_when_empty() {
        let result = AnalysisResult::default();
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["security_issues"].as_array().unwrap().is_empty());
        assert!(json["code_quality_issues"].as_array().unwrap().is_empty());
        assert!(json["performance_issues"].as_array().unwrap().is_empty());
        assert_eq!(json["summary"], "");
    }

    #[test]
    fn scope_key_display() {
        let scope = ScopeKey::new("alice", "demo", 42);
        assert_eq!(scope.to_string(), "alice/demo#42");
    }
}
