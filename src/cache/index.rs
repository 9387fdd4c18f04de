//! Invalidation index: tag and namespace reverse maps
//!
//! Maintained incrementally on every put/forget. A forward map
//! (key -> recorded tags/namespace) makes `remove_key` O(tags) instead of
//! a full reverse-map walk. `validate` is diagnostic only; `rebuild` is
//! the destructive repair, reconstructing everything from store scans.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::cache::error::CacheOperationError;
use crate::cache::tier::TierStore;

/// Tags and namespace recorded for one key at write time.
#[derive(Debug, Clone, Default)]
struct KeyMeta {
    tags: BTreeSet<String>,
    namespace: Option<String>,
}

/// Outcome of a non-destructive index validation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Human-readable descriptions of each orphaned or missing entry.
    pub issues: Vec<String>,
}

#[derive(Debug, Default)]
pub struct InvalidationIndex {
    tags: DashMap<String, BTreeSet<String>>,
    namespaces: DashMap<String, BTreeSet<String>>,
    keys: DashMap<String, KeyMeta>,
}

impl InvalidationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key's tags and namespace. Called on every put; replaces
    /// whatever was recorded for the key before.
    pub fn record(&self, key: &str, tags: &BTreeSet<String>, namespace: &str) {
        self.remove_key(key);
        for tag in tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        let namespace = (!namespace.is_empty()).then(|| namespace.to_string());
        if let Some(ns) = &namespace {
            self.namespaces
                .entry(ns.clone())
                .or_default()
                .insert(key.to_string());
        }
        if !tags.is_empty() || namespace.is_some() {
            self.keys.insert(
                key.to_string(),
                KeyMeta {
                    tags: tags.clone(),
                    namespace,
                },
            );
        }
    }

    /// Drop every index reference to a key. Called on every forget.
    pub fn remove_key(&self, key: &str) {
        let Some((_, meta)) = self.keys.remove(key) else {
            return;
        };
        for tag in &meta.tags {
            if let Some(mut bucket) = self.tags.get_mut(tag) {
                bucket.remove(key);
            }
        }
        if let Some(ns) = &meta.namespace {
            if let Some(mut bucket) = self.namespaces.get_mut(ns) {
                bucket.remove(key);
            }
        }
    }

    pub fn resolve_tag(&self, tag: &str) -> BTreeSet<String> {
        self.tags.get(tag).map(|b| b.clone()).unwrap_or_default()
    }

    pub fn resolve_namespace(&self, namespace: &str) -> BTreeSet<String> {
        self.namespaces
            .get(namespace)
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    /// Keys currently known to the index (tagged or namespaced).
    pub fn known_keys(&self) -> Vec<String> {
        self.keys.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.tags.clear();
        self.namespaces.clear();
        self.keys.clear();
    }

    /// Drop buckets emptied by per-key removals. Returns buckets pruned.
    pub fn prune_empty(&self) -> u64 {
        let mut pruned = 0u64;
        let before_tags = self.tags.len();
        self.tags.retain(|_, bucket| !bucket.is_empty());
        pruned += (before_tags - self.tags.len()) as u64;
        let before_ns = self.namespaces.len();
        self.namespaces.retain(|_, bucket| !bucket.is_empty());
        pruned += (before_ns - self.namespaces.len()) as u64;
        pruned
    }

    /// Drop index references to keys no longer present in any store.
    /// Used after a single-tier flush. Returns keys dropped.
    pub async fn prune_missing(
        &self,
        stores: &[Arc<dyn TierStore>],
    ) -> Result<u64, CacheOperationError> {
        let mut dropped = 0u64;
        for key in self.known_keys() {
            if !exists_anywhere(stores, &key).await {
                self.remove_key(&key);
                dropped += 1;
            }
        }
        self.prune_empty();
        Ok(dropped)
    }

    /// Reconstruct the index from full store scans. Entries changing
    /// mid-scan are tolerated; the next maintenance cycle converges.
    pub async fn rebuild(
        &self,
        stores: &[Arc<dyn TierStore>],
    ) -> Result<usize, CacheOperationError> {
        self.clear();
        let mut indexed = 0usize;
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for store in stores {
            if !store.is_available() {
                continue;
            }
            let keys = match store.scan_prefix("").await {
                Ok(keys) => keys,
                Err(e) => {
                    log::warn!("index rebuild skipping {} tier: {e}", store.kind());
                    continue;
                }
            };
            for key in keys {
                if !seen.insert(key.clone()) {
                    continue;
                }
                if let Ok(Some(entry)) = store.get(&key).await {
                    if !entry.tags.is_empty() || !entry.namespace.is_empty() {
                        self.record(&key, &entry.tags, &entry.namespace);
                        indexed += 1;
                    }
                }
            }
        }
        Ok(indexed)
    }

    /// Cross-check index entries against actual tier presence. Reports
    /// orphaned index entries (indexed key absent from every store) and
    /// missing ones (stored tagged entry the index does not know). Never
    /// mutates state.
    pub async fn validate(
        &self,
        stores: &[Arc<dyn TierStore>],
    ) -> Result<ValidationReport, CacheOperationError> {
        let mut issues = Vec::new();

        for key in self.known_keys() {
            if !exists_anywhere(stores, &key).await {
                issues.push(format!("orphaned: index references absent key {key:?}"));
            }
        }

        let mut seen: BTreeSet<String> = BTreeSet::new();
        for store in stores {
            if !store.is_available() {
                continue;
            }
            let keys = match store.scan_prefix("").await {
                Ok(keys) => keys,
                Err(_) => continue,
            };
            for key in keys {
                if !seen.insert(key.clone()) {
                    continue;
                }
                let Ok(Some(entry)) = store.get(&key).await else {
                    continue;
                };
                if entry.tags.is_empty() && entry.namespace.is_empty() {
                    continue;
                }
                let indexed = self.keys.get(&key).is_some();
                if !indexed {
                    issues.push(format!(
                        "missing: stored key {key:?} has tags/namespace but no index entry"
                    ));
                }
            }
        }

        Ok(ValidationReport {
            valid: issues.is_empty(),
            issues,
        })
    }
}

async fn exists_anywhere(stores: &[Arc<dyn TierStore>], key: &str) -> bool {
    for store in stores {
        if !store.is_available() {
            continue;
        }
        if matches!(store.exists(key).await, Ok(true)) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn record_and_resolve() {
        let index = InvalidationIndex::new();
        index.record("k1", &tags(&["a", "b"]), "ns1");
        index.record("k2", &tags(&["b"]), "ns1");
        assert_eq!(index.resolve_tag("b").len(), 2);
        assert_eq!(index.resolve_tag("a"), tags(&["k1"]));
        assert_eq!(index.resolve_namespace("ns1").len(), 2);
        assert!(index.resolve_tag("missing").is_empty());
    }

    #[test]
    fn re_record_replaces_old_tags() {
        let index = InvalidationIndex::new();
        index.record("k", &tags(&["old"]), "ns");
        index.record("k", &tags(&["new"]), "ns2");
        assert!(index.resolve_tag("old").is_empty());
        assert_eq!(index.resolve_tag("new"), tags(&["k"]));
        assert!(index.resolve_namespace("ns").is_empty());
    }

    #[test]
    fn remove_key_clears_all_references() {
        let index = InvalidationIndex::new();
        index.record("k", &tags(&["a"]), "ns");
        index.remove_key("k");
        assert!(index.resolve_tag("a").is_empty());
        assert!(index.resolve_namespace("ns").is_empty());
        assert!(index.known_keys().is_empty());
        // Second removal is a no-op.
        index.remove_key("k");
    }

    #[test]
    fn prune_empty_drops_vacated_buckets() {
        let index = InvalidationIndex::new();
        index.record("k", &tags(&["a"]), "ns");
        index.remove_key("k");
        assert_eq!(index.prune_empty(), 2);
    }
}
