//! Cross-run finding history.
//!
//! The tracker remembers, per pull request scope, the severity and
//! first-seen marker recorded the first time each finding identity was
//! observed. The merge engine reads these back so that a recurring finding
//! keeps its original triage even when the reviewer's severity judgment
//! drifts between invocations.
//!
//! State is process-lifetime and in-memory. Locks are held only for the
//! duration of a single map operation, never across an await point; ordering
//! of merge/record sequences for one scope is enforced by the per-scope
//! locks in the review coordinator.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::{Category, HistoryEntry, ScopeKey, Severity};

/// Per-scope map from finding identity to its recorded history entry.
pub struct HistoryTracker {
    scopes: RwLock<HashMap<ScopeKey, HashMap<String, HistoryEntry>>>,
}

impl HistoryTracker {
    pub fn new() -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the recorded entry for an identity within a scope.
    pub fn lookup(&self, scope: &ScopeKey, identity: &str) -> Option<HistoryEntry> {
        let scopes = self.scopes.read().expect("history lock poisoned");
        scopes.get(scope).and_then(|m| m.get(identity)).cloned()
    }

    /// Record a new entry, only if none exists for this (scope, identity).
    ///
    /// An existing entry is left untouched; callers check with [`lookup`]
    /// first and only record unrecognized findings.
    ///
    /// [`lookup`]: HistoryTracker::lookup
    pub fn record(
        &self,
        scope: &ScopeKey,
        identity: &str,
        severity: Severity,
        category: Category,
        first_seen: &str,
    ) {
        let mut scopes = self.scopes.write().expect("history lock poisoned");
        scopes
            .entry(scope.clone())
            .or_default()
            .entry(identity.to_string())
            .or_insert(HistoryEntry {
                severity,
                first_seen: first_seen.to_string(),
                category,
            });
    }

    /// Remove an identity's entry, returning whether it was present.
    ///
    /// Used when a human marks an issue as fixed: if the same textual
    /// finding reappears later it is treated as new rather than silently
    /// inheriting stale severity.
    pub fn resolve(&self, scope: &ScopeKey, identity: &str) -> bool {
        let mut scopes = self.scopes.write().expect("history lock poisoned");
        match scopes.get_mut(scope) {
            Some(entries) => entries.remove(identity).is_some(),
            None => false,
        }
    }

    /// Number of tracked identities for a scope.
    pub fn tracked_count(&self, scope: &ScopeKey) -> usize {
        let scopes = self.scopes.read().expect("history lock poisoned");
        scopes.get(scope).map_or(0, |m| m.len())
    }
}

impl Default for HistoryTracker {
    fn default() -> Self {
        Self::new()
    }
}
