//! Integration tests for the review pipeline.
//!
//! These tests drive the recheck coordinator end-to-end with a scripted
//! source host and reviewer, proving the cache short-circuit, severity
//! stability across regenerations, resolve semantics, and the
//! degraded-result contract — without any network.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use review_harness::config::ReviewerConfig;
use review_harness::host::{
    HostUser, PrAuthor, PrHead, PullRequestDetails, PullRequestFile, PullRequestSummary, RepoInfo,
    SourceHost, UpstreamFailure,
};
use review_harness::models::{ScopeKey, Severity};
use review_harness::review::{run_review, ReviewState};
use review_harness::reviewer::Reviewer;

// ─── Scripted host ──────────────────────────────────────────────────

/// A source host with a settable head commit and fixed diff.
struct ScriptedHost {
    head_sha: Mutex<String>,
    /// When set, `fetch_pr` fails with this upstream status.
    fail_status: Mutex<Option<u16>>,
}

impl ScriptedHost {
    fn new(head_sha: &str) -> Self {
        Self {
            head_sha: Mutex::new(head_sha.to_string()),
            fail_status: Mutex::new(None),
        }
    }

    fn set_head(&self, sha: &str) {
        *self.head_sha.lock().unwrap() = sha.to_string();
    }

    fn fail_with(&self, status: u16) {
        *self.fail_status.lock().unwrap() = Some(status);
    }
}

#[async_trait]
impl SourceHost for ScriptedHost {
    async fn exchange_code(&self, _code: &str) -> Result<String> {
        Ok("test-token".to_string())
    }

    async fn fetch_user(&self, _token: &str) -> Result<HostUser> {
        Ok(HostUser {
            login: "alice".to_string(),
            id: 1,
            avatar_url: None,
        })
    }

    async fn verify_repo(&self, _token: &str, owner: &str, repo: &str) -> Result<RepoInfo> {
        Ok(RepoInfo {
            id: 1001,
            name: repo.to_string(),
            full_name: format!("{owner}/{repo}"),
            private: false,
            html_url: String::new(),
        })
    }

    async fn list_pull_requests(
        &self,
        _token: &str,
        _owner: &str,
        _repo: &str,
    ) -> Result<Vec<PullRequestSummary>> {
        Ok(Vec::new())
    }

    async fn fetch_pr(
        &self,
        _token: &str,
        _owner: &str,
        _repo: &str,
        number: u64,
    ) -> Result<PullRequestDetails> {
        if let Some(status) = *self.fail_status.lock().unwrap() {
            return Err(anyhow::Error::new(UpstreamFailure {
                status,
                message: "scripted failure".to_string(),
            }));
        }

        Ok(PullRequestDetails {
            number,
            title: "Add caching".to_string(),
            body: Some("Speeds up repeated lookups.".to_string()),
            state: "open".to_string(),
            user: PrAuthor {
                login: "alice".to_string(),
            },
            head: PrHead {
                sha: self.head_sha.lock().unwrap().clone(),
                branch: "feature/cache".to_string(),
            },
        })
    }

    async fn fetch_pr_files(
        &self,
        _token: &str,
        _owner: &str,
        _repo: &str,
        _number: u64,
    ) -> Result<Vec<PullRequestFile>> {
        Ok(vec![PullRequestFile {
            filename: "db.py".to_string(),
            status: "modified".to_string(),
            additions: 12,
            deletions: 3,
            patch: Some("@@ -1 +1 @@\n-query(a)\n+query(a + b)".to_string()),
            raw_url: String::new(),
        }])
    }

    async fn fetch_raw_file(&self, _token: &str, _raw_url: &str) -> Result<String> {
        Ok(String::new())
    }
}

// ─── Scripted reviewer ──────────────────────────────────────────────

/// A reviewer that replays queued responses and counts invocations.
struct ScriptedReviewer {
    responses: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedReviewer {
    fn new(responses: Vec<&str>) -> Self {
        let mut queued: Vec<String> = responses.into_iter().map(str::to_string).collect();
        queued.reverse(); // pop from the back in order
        Self {
            responses: Mutex::new(queued),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reviewer for ScriptedReviewer {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn review(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().pop() {
            Some(response) => Ok(response),
            None => anyhow::bail!("scripted reviewer exhausted"),
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn scope() -> ScopeKey {
    ScopeKey::new("alice", "demo", 42)
}

fn reviewer_config() -> ReviewerConfig {
    ReviewerConfig::default()
}

const SQL_INJECTION_HIGH: &str = r#"{
    "security_issues": [
        {"severity": "high", "description": "SQL injection in query builder allows untrusted input into the statement", "file": "db.py", "suggestion": "use parameterized queries"}
    ],
    "code_quality_issues": [],
    "performance_issues": [],
    "summary": "ok"
}"#;

const SQL_INJECTION_LOW: &str = r#"{
    "security_issues": [
        {"severity": "low", "description": "SQL injection in query builder allows untrusted input into the statement", "file": "db.py", "suggestion": "sanitize inputs"}
    ],
    "code_quality_issues": [],
    "performance_issues": [],
    "summary": "mostly fine"
}"#;

// ─── Tests ──────────────────────────────────────────────────────────

/// An unchanged head commit answers from the cache with zero reviewer calls.
#[tokio::test]
async fn recheck_short_circuits_on_unchanged_head() {
    let state = ReviewState::new();
    let host = ScriptedHost::new("sha1");
    let reviewer = ScriptedReviewer::new(vec![SQL_INJECTION_HIGH]);

    let first = run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap();
    assert!(!first.cached);
    assert!(!first.no_changes);
    assert_eq!(first.commit_sha, "sha1");
    assert_eq!(reviewer.call_count(), 1);

    let second = run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap();
    assert!(second.cached);
    assert!(second.no_changes);
    assert_eq!(second.commit_sha, "sha1");
    assert_eq!(second.result.security_issues.len(), 1);
    // The reviewer was not consulted again.
    assert_eq!(reviewer.call_count(), 1);
}

/// A moved head commit runs exactly one fresh pipeline and caches under
/// the new commit, leaving the old entry intact.
#[tokio::test]
async fn head_move_runs_pipeline_once_per_commit() {
    let state = ReviewState::new();
    let host = ScriptedHost::new("sha1");
    let reviewer = ScriptedReviewer::new(vec![SQL_INJECTION_HIGH, SQL_INJECTION_LOW]);

    run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap();

    host.set_head("sha2");
    let second = run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap();
    assert!(!second.cached);
    assert_eq!(second.commit_sha, "sha2");
    assert_eq!(reviewer.call_count(), 2);

    // Both commits now hit the cache independently.
    assert!(state.cache.get(&scope(), "sha1").is_some());
    assert!(state.cache.get(&scope(), "sha2").is_some());
}

/// The recorded severity wins over the reviewer's drifted judgment on
/// re-analysis: high stays high even when the model says low.
#[tokio::test]
async fn severity_is_stable_across_regenerations() {
    let state = ReviewState::new();
    let host = ScriptedHost::new("sha1");
    let reviewer = ScriptedReviewer::new(vec![SQL_INJECTION_HIGH, SQL_INJECTION_LOW]);

    let first = run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap();
    assert_eq!(first.result.security_issues[0].severity, Severity::High);
    let original_marker = first.result.security_issues[0].first_seen.clone();

    host.set_head("sha2");
    let second = run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap();

    let finding = &second.result.security_issues[0];
    assert_eq!(finding.severity, Severity::High, "history wins over the model");
    assert_eq!(finding.first_seen, original_marker);
    // Latest text still comes through.
    assert_eq!(finding.suggestion, "sanitize inputs");
}

/// Resolving a finding resets its history: a reappearance is new.
#[tokio::test]
async fn resolve_then_reappear_is_treated_as_new() {
    let state = ReviewState::new();
    let host = ScriptedHost::new("sha1");
    let reviewer = ScriptedReviewer::new(vec![SQL_INJECTION_HIGH, SQL_INJECTION_LOW]);

    let first = run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap();
    let identity = first.result.security_issues[0].identity.clone();

    assert!(state.resolve_finding(&scope(), &identity));

    host.set_head("sha2");
    let second = run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap();

    let finding = &second.result.security_issues[0];
    assert_eq!(finding.severity, Severity::Low, "fresh severity after resolve");
    assert_eq!(finding.first_seen, "current");
    assert_eq!(finding.identity, identity, "same text, same fingerprint");
}

/// Unparseable reviewer output yields a degraded result that is never
/// cached, so the same head commit retries the pipeline.
#[tokio::test]
async fn degraded_result_is_not_cached() {
    let state = ReviewState::new();
    let host = ScriptedHost::new("sha1");
    let reviewer = ScriptedReviewer::new(vec!["Sorry, I had trouble with that.", SQL_INJECTION_HIGH]);

    let first = run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap();
    assert!(first.degraded);
    assert!(!first.cached);
    assert_eq!(first.result.code_quality_issues.len(), 1);
    assert_eq!(first.result.code_quality_issues[0].file, "system");
    assert!(state.cache.get(&scope(), "sha1").is_none());

    // Same head: the pipeline runs again instead of hitting a cache.
    let second = run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap();
    assert!(!second.degraded);
    assert!(!second.cached);
    assert_eq!(reviewer.call_count(), 2);
    assert!(state.cache.get(&scope(), "sha1").is_some());
}

/// A reviewer failure surfaces as an error and writes nothing to the cache.
#[tokio::test]
async fn reviewer_failure_caches_nothing() {
    let state = ReviewState::new();
    let host = ScriptedHost::new("sha1");
    let reviewer = ScriptedReviewer::new(vec![]); // exhausted immediately

    let err = run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exhausted"));
    assert!(state.cache.is_empty());
}

/// A PR that cannot be fetched is fatal, with the upstream status intact.
#[tokio::test]
async fn upstream_failure_propagates_status() {
    let state = ReviewState::new();
    let host = ScriptedHost::new("sha1");
    host.fail_with(404);
    let reviewer = ScriptedReviewer::new(vec![SQL_INJECTION_HIGH]);

    let err = run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap_err();

    assert_eq!(review_harness::host::upstream_status(&err), Some(404));
    assert_eq!(reviewer.call_count(), 0);
    assert!(state.cache.is_empty());
}

/// Histories are scoped per pull request: the same finding in two PRs
/// keeps two independent timelines.
#[tokio::test]
async fn scopes_do_not_share_history() {
    let state = ReviewState::new();
    let host = ScriptedHost::new("sha1");
    let reviewer = ScriptedReviewer::new(vec![SQL_INJECTION_HIGH, SQL_INJECTION_LOW]);

    run_review(&state, &host, &reviewer, &reviewer_config(), "t", &scope())
        .await
        .unwrap();

    // A different PR number sees its own first observation: low sticks.
    let other = ScopeKey::new("alice", "demo", 43);
    let outcome = run_review(&state, &host, &reviewer, &reviewer_config(), "t", &other)
        .await
        .unwrap();
    assert_eq!(outcome.result.security_issues[0].severity, Severity::Low);
}
