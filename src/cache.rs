//! Commit-keyed analysis cache.
//!
//! Maps (owner, repo, pr_number, commit_sha) to a previously computed,
//! fully merged analysis result. Lookup is exact-match only: any new commit
//! on the PR branch is a distinct key with no relationship to prior entries.
//! Entries are never mutated and never evicted; the cache lives for the
//! process lifetime. The narrow get/put API is the seam where a bounded or
//! durable store could be swapped in without touching the recheck logic.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::{AnalysisResult, ScopeKey};

/// A cached analysis along with the commit it was computed against.
#[derive(Debug, Clone)]
pub struct CachedAnalysis {
    pub commit_sha: String,
    pub result: AnalysisResult,
}

/// Exact-match cache of merged analysis results.
pub struct AnalysisCache {
    entries: RwLock<HashMap<(ScopeKey, String), CachedAnalysis>>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached analysis for this exact scope and commit, if any.
    pub fn get(&self, scope: &ScopeKey, commit_sha: &str) -> Option<CachedAnalysis> {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries
            .get(&(scope.clone(), commit_sha.to_string()))
            .cloned()
    }

    /// Store a merged analysis under this scope and commit.
    pub fn put(&self, scope: &ScopeKey, commit_sha: &str, result: AnalysisResult) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.insert(
            (scope.clone(), commit_sha.to_string()),
            CachedAnalysis {
                commit_sha: commit_sha.to_string(),
                result,
            },
        );
    }

    /// Number of cached entries across all scopes.
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_summary(summary: &str) -> AnalysisResult {
        AnalysisResult {
            summary: summary.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn get_requires_exact_key() {
        let cache = AnalysisCache::new();
        let scope = ScopeKey::new("alice", "demo", 42);
        cache.put(&scope, "sha1", result_with_summary("ok"));

        assert!(cache.get(&scope, "sha1").is_some());
        assert!(cache.get(&scope, "sha2").is_none());
        assert!(cache
            .get(&ScopeKey::new("alice", "demo", 43), "sha1")
            .is_none());
        assert!(cache
            .get(&ScopeKey::new("alice", "other", 42), "sha1")
            .is_none());
        assert!(cache
            .get(&ScopeKey::new("bob", "demo", 42), "sha1")
            .is_none());
    }

    #[test]
    fn put_records_commit_sha() {
        let cache = AnalysisCache::new();
        let scope = ScopeKey::new("alice", "demo", 42);
        cache.put(&scope, "sha1", result_with_summary("ok"));

        let hit = cache.get(&scope, "sha1").unwrap();
        assert_eq!(hit.commit_sha, "sha1");
        assert_eq!(hit.result.summary, "ok");
    }

    #[test]
    fn distinct_commits_coexist() {
        let cache = AnalysisCache::new();
        let scope = ScopeKey::new("alice", "demo", 42);
        cache.put(&scope, "sha1", result_with_summary("first"));
        cache.put(&scope, "sha2", result_with_summary("second"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&scope, "sha1").unwrap().result.summary, "first");
        assert_eq!(cache.get(&scope, "sha2").unwrap().result.summary, "second");
    }
}
