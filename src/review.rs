//! The recheck coordinator.
//!
//! This is the only place that decides between reusing a cached analysis
//! and regenerating one, and the only writer of the analysis cache. The
//! flow per request:
//!
//! 1. fetch the PR's current head commit (fatal if the PR can't be fetched)
//! 2. cache hit for that exact commit → return it, zero reviewer calls
//! 3. cache miss → fetch the diff, invoke the reviewer, parse, merge
//!    against history, cache the merged result (unless degraded)
//!
//! Mutations for one pull request are serialized through a lazily created
//! per-scope async mutex, so concurrent requests for the same PR cannot
//! race the merge's read-then-record sequence or double-invoke the
//! reviewer, while unrelated PRs proceed fully in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::AnalysisCache;
use crate::config::ReviewerConfig;
use crate::history::HistoryTracker;
use crate::host::SourceHost;
use crate::identity::finding_identity;
use crate::merge::merge_findings;
use crate::models::{AnalysisResult, Category, ScopeKey};
use crate::parse::parse_review_output;
use crate::reviewer::{build_prompt, Reviewer};

/// Shared review state: the commit-keyed cache, the per-scope finding
/// history, and the per-scope serialization locks. Constructed once and
/// injected wherever analyses run, so tests build isolated instances.
pub struct ReviewState {
    pub cache: AnalysisCache,
    pub history: HistoryTracker,
    locks: Mutex<HashMap<ScopeKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ReviewState {
    pub fn new() -> Self {
        Self {
            cache: AnalysisCache::new(),
            history: HistoryTracker::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (or lazily create) the serialization lock for a scope.
    fn scope_lock(&self, scope: &ScopeKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("scope lock map poisoned");
        locks.entry(scope.clone()).or_default().clone()
    }

    /// Drop a finding's history entry so a future reappearance is treated
    /// as new. Returns whether an entry was removed.
    pub fn resolve_finding(&self, scope: &ScopeKey, identity: &str) -> bool {
        self.history.resolve(scope, identity)
    }
}

impl Default for ReviewState {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of one analysis request.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    #[serde(flatten)]
    pub result: AnalysisResult,
    pub commit_sha: String,
    /// True when the result was served from the cache without running the
    /// pipeline (the head commit had not moved).
    pub cached: bool,
    pub no_changes: bool,
    /// True when the reviewer's output could not be parsed and `result`
    /// is the synthetic advisory shape.
    pub degraded: bool,
}

/// Analyze a pull request, reusing the cached result when its head commit
/// is unchanged.
pub async fn run_review(
    state: &ReviewState,
    host: &dyn SourceHost,
    reviewer: &dyn Reviewer,
    reviewer_config: &ReviewerConfig,
    token: &str,
    scope: &ScopeKey,
) -> Result<ReviewOutcome> {
    let details = host
        .fetch_pr(token, &scope.owner, &scope.repo, scope.number)
        .await
        .with_context(|| format!("failed to fetch pull request {scope}"))?;
    let head_sha = details.head.sha.clone();

    // Serialize everything below per scope: the cache check and the
    // pipeline must not interleave for the same PR.
    let lock = state.scope_lock(scope);
    let _guard = lock.lock().await;

    if let Some(hit) = state.cache.get(scope, &head_sha) {
        debug!(%scope, sha = %head_sha, "analysis cache hit");
        return Ok(ReviewOutcome {
            result: hit.result,
            commit_sha: hit.commit_sha,
            cached: true,
            no_changes: true,
            degraded: false,
        });
    }

    info!(%scope, sha = %head_sha, "analysis cache miss, running review pipeline");

    let files = host
        .fetch_pr_files(token, &scope.owner, &scope.repo, scope.number)
        .await
        .with_context(|| format!("failed to fetch files for {scope}"))?;

    let prompt = build_prompt(&details, &files, reviewer_config.max_patch_bytes);
    let raw = reviewer.review(&prompt).await?;

    let parsed = parse_review_output(&raw);

    if parsed.degraded {
        // The advisory finding is synthetic; it bypasses history so it
        // cannot shadow a real finding, and the result is never cached so
        // the same head retries the pipeline next time.
        let mut result = parsed.result;
        for finding in &mut result.code_quality_issues {
            finding.identity = finding_identity(&finding.file, &finding.description);
        }
        info!(%scope, sha = %head_sha, "reviewer output unparseable, returning degraded result");
        return Ok(ReviewOutcome {
            result,
            commit_sha: head_sha,
            cached: false,
            no_changes: false,
            degraded: true,
        });
    }

    let merged = AnalysisResult {
        security_issues: merge_findings(
            parsed.result.security_issues,
            Category::Security,
            scope,
            &state.history,
        ),
        code_quality_issues: merge_findings(
            parsed.result.code_quality_issues,
            Category::CodeQuality,
            scope,
            &state.history,
        ),
        performance_issues: merge_findings(
            parsed.result.performance_issues,
            Category::Performance,
            scope,
            &state.history,
        ),
        summary: parsed.result.summary,
    };

    state.cache.put(scope, &head_sha, merged.clone());
    info!(
        %scope,
        sha = %head_sha,
        findings = merged.finding_count(),
        "review cached"
    );

    Ok(ReviewOutcome {
        result: merged,
        commit_sha: head_sha,
        cached: false,
        no_changes: false,
        degraded: false,
    })
}
