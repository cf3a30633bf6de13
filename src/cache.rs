//! Status Cache & Dedupe (spec.md §4.E) — a process-wide singleton.
//!
//! Grounded on the teacher's `BroadcastRegistry`
//! (`services/server/src/state.rs`): an `Arc<RwLock<HashMap<...>>>` guarded
//! the same way `broadcast_registry` is, read-mostly with a write path that
//! re-checks after acquiring the write lock.

use gateway_protocol::StatusEntry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct Key {
    host: String,
    source: String,
    entry_type: String,
}

/// Result of applying an update to the cache (spec.md §4.E steps 1-3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Value unchanged; dropped, no broadcast.
    Unchanged,
    /// Value changed (or new key); caller should broadcast the given entry.
    Changed(StatusEntry),
}

#[derive(Default)]
struct Inner {
    values: HashMap<Key, String>,
}

/// Process-wide last-known-value cache, keyed by `(host, source, type)`.
#[derive(Clone)]
pub struct StatusCache {
    inner: Arc<RwLock<Inner>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Apply a translated update. `sys_time` is supplied by the caller
    /// (typically `chrono::Utc::now()` formatted) so this stays a pure
    /// function of its inputs plus current cache state, not of wall clock.
    pub async fn apply(
        &self,
        host: &str,
        source: &str,
        entry_type: &str,
        value: &str,
        sys_time: &str,
    ) -> UpdateOutcome {
        let key = Key {
            host: host.to_owned(),
            source: source.to_owned(),
            entry_type: entry_type.to_owned(),
        };

        {
            let guard = self.inner.read().await;
            if guard.values.get(&key).map(String::as_str) == Some(value) {
                return UpdateOutcome::Unchanged;
            }
        }

        let mut guard = self.inner.write().await;
        if guard.values.get(&key).map(String::as_str) == Some(value) {
            return UpdateOutcome::Unchanged;
        }
        guard.values.insert(key.clone(), value.to_owned());

        UpdateOutcome::Changed(StatusEntry {
            host: key.host,
            source: key.source,
            entry_type: key.entry_type,
            value: value.to_owned(),
            sys_time: sys_time.to_owned(),
        })
    }

    /// The full snapshot array, one entry per `(host, source, type)`
    /// (spec.md §4.E Invariant).
    pub async fn snapshot(&self) -> Vec<StatusEntry> {
        let guard = self.inner.read().await;
        guard
            .values
            .iter()
            .map(|(key, value)| StatusEntry {
                host: key.host.clone(),
                source: key.source.clone(),
                entry_type: key.entry_type.clone(),
                value: value.clone(),
                sys_time: String::new(),
            })
            .collect()
    }
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_update_is_always_a_change() {
        let cache = StatusCache::new();
        let outcome = cache.apply("10.0.0.1", "ess", "subject", "sally", "t0").await;
        assert_eq!(
            outcome,
            UpdateOutcome::Changed(StatusEntry {
                host: "10.0.0.1".to_owned(),
                source: "ess".to_owned(),
                entry_type: "subject".to_owned(),
                value: "sally".to_owned(),
                sys_time: "t0".to_owned(),
            })
        );
    }

    #[tokio::test]
    async fn duplicate_update_is_suppressed() {
        let cache = StatusCache::new();
        cache.apply("10.0.0.1", "ess", "subject", "sally", "t0").await;
        let outcome = cache.apply("10.0.0.1", "ess", "subject", "sally", "t1").await;
        assert_eq!(outcome, UpdateOutcome::Unchanged);
    }

    #[tokio::test]
    async fn changed_value_broadcasts_with_new_sys_time() {
        let cache = StatusCache::new();
        cache.apply("10.0.0.1", "ess", "subject", "sally", "t0").await;
        let outcome = cache.apply("10.0.0.1", "ess", "subject", "bob", "t1").await;
        assert_eq!(
            outcome,
            UpdateOutcome::Changed(StatusEntry {
                host: "10.0.0.1".to_owned(),
                source: "ess".to_owned(),
                entry_type: "subject".to_owned(),
                value: "bob".to_owned(),
                sys_time: "t1".to_owned(),
            })
        );
    }

    #[tokio::test]
    async fn snapshot_has_exactly_one_entry_per_key() {
        let cache = StatusCache::new();
        cache.apply("10.0.0.1", "ess", "subject", "sally", "t0").await;
        cache.apply("10.0.0.1", "ess", "subject", "bob", "t1").await;
        cache.apply("10.0.0.1", "ess", "running", "1", "t1").await;
        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        let subject = snapshot.iter().find(|e| e.entry_type == "subject").unwrap();
        assert_eq!(subject.value, "bob");
    }
}
