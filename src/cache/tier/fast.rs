//! Fast tier: shared low-latency in-process store
//!
//! DashMap-backed shared tier with TTL-on-write and an atomic
//! insert-if-absent through the map's entry API. When a capacity limit is
//! configured, inserts first drop expired entries and then evict the
//! oldest live entry by creation time.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::entry::CacheEntry;
use crate::cache::error::CacheOperationError;
use crate::cache::tier::{TierKind, TierStore, TierUsage};

#[derive(Debug)]
pub struct FastStore {
    entries: DashMap<String, CacheEntry>,
    /// 0 means unlimited.
    max_entries: AtomicUsize,
    available: AtomicBool,
}

impl Default for FastStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FastStore {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: AtomicUsize::new(max_entries.unwrap_or(0)),
            available: AtomicBool::new(true),
        }
    }

    fn check_available(&self) -> Result<(), CacheOperationError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CacheOperationError::TierUnavailable(TierKind::Fast))
        }
    }

    /// Make room for one more entry when a capacity limit is set.
    fn evict_for_insert(&self, incoming_key: &str) {
        let max = self.max_entries.load(Ordering::Acquire);
        if max == 0 || self.entries.len() < max || self.entries.contains_key(incoming_key) {
            return;
        }
        self.entries.retain(|_, entry| !entry.is_expired());
        while self.entries.len() >= max {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().created_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl TierStore for FastStore {
    fn kind(&self) -> TierKind {
        TierKind::Fast
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheOperationError> {
        self.check_available()?;
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove_if(key, |_, e| e.is_expired());
                return Ok(None);
            }
            return Ok(Some(entry.clone()));
        }
        Ok(None)
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheOperationError> {
        self.check_available()?;
        self.evict_for_insert(&entry.key);
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, entry: CacheEntry) -> Result<bool, CacheOperationError> {
        self.check_available()?;
        self.evict_for_insert(&entry.key);
        match self.entries.entry(entry.key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(entry);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheOperationError> {
        self.check_available()?;
        Ok(self
            .entries
            .remove(key)
            .map(|(_, e)| !e.is_expired())
            .unwrap_or(false))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheOperationError> {
        self.check_available()?;
        match self.entries.get(key) {
            Some(entry) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheOperationError> {
        self.check_available()?;
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired())
            .map(|e| e.key().clone())
            .collect())
    }

    async fn usage(&self) -> Result<TierUsage, CacheOperationError> {
        self.check_available()?;
        let mut usage = TierUsage::default();
        for entry in self.entries.iter() {
            if !entry.value().is_expired() {
                usage.entries += 1;
                usage.bytes += entry.value().estimated_size();
            }
        }
        Ok(usage)
    }

    async fn clear(&self) -> Result<(), CacheOperationError> {
        self.check_available()?;
        self.entries.clear();
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheOperationError> {
        self.check_available()?;
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn optimize(&self) -> Result<(), CacheOperationError> {
        self.check_available()?;
        // Shrink shards after heavy churn.
        self.entries.shrink_to_fit();
        Ok(())
    }

    fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn configure_capacity(&self, max_entries: Option<usize>) {
        self.max_entries
            .store(max_entries.unwrap_or(0), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn entry(key: &str, value: &[u8], ttl: Option<Duration>) -> CacheEntry {
        CacheEntry::new(key, value.to_vec(), ttl, BTreeSet::new(), "test", 1)
    }

    #[tokio::test]
    async fn set_if_absent_preserves_existing() {
        let store = FastStore::default();
        assert!(store.set_if_absent(entry("k", b"first", None)).await.unwrap());
        assert!(!store.set_if_absent(entry("k", b"second", None)).await.unwrap());
        let held = store.get("k").await.unwrap().unwrap();
        assert_eq!(held.value, b"first");
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = FastStore::default();
        store
            .set(entry("k", b"v", Some(Duration::ZERO)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.exists("k").await.unwrap());
        // Expired slot can be re-claimed by set_if_absent.
        store
            .set(entry("k2", b"v", Some(Duration::ZERO)))
            .await
            .unwrap();
        assert!(store.set_if_absent(entry("k2", b"new", None)).await.unwrap());
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let store = FastStore::new(Some(2));
        store.set(entry("a", b"1", None)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.set(entry("b", b"2", None)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.set(entry("c", b"3", None)).await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_some());
        assert!(store.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn scan_prefix_filters_keys() {
        let store = FastStore::default();
        store.set(entry("geo:a", b"1", None)).await.unwrap();
        store.set(entry("geo:b", b"2", None)).await.unwrap();
        store.set(entry("ip:a", b"3", None)).await.unwrap();
        let mut keys = store.scan_prefix("geo:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["geo:a".to_string(), "geo:b".to_string()]);
    }
}
