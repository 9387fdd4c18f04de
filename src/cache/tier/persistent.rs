//! Persistent tier: durable store over an external key-value contract
//!
//! The persistence engine itself is an external collaborator; this tier
//! only consumes its sorted key-value contract (`KvBackend`). Records are
//! serialized `CacheEntry` values, so tags/namespace/expiry survive a
//! process restart and the index can be rebuilt from a full scan.
//! `MemoryBackend` is the in-crate default used by tests and by embedders
//! that have no durable engine wired up yet.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::cache::entry::CacheEntry;
use crate::cache::error::CacheOperationError;
use crate::cache::tier::{TierKind, TierStore, TierUsage};

/// Sorted key-value contract the persistent tier consumes.
///
/// `scan` must return keys in lexicographic order for the given prefix;
/// everything else is a plain keyed blob store.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheOperationError>;

    async fn write(&self, key: &str, record: Vec<u8>) -> Result<(), CacheOperationError>;

    /// Returns whether the key was present.
    async fn remove(&self, key: &str) -> Result<bool, CacheOperationError>;

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, CacheOperationError>;

    async fn clear(&self) -> Result<(), CacheOperationError>;

    async fn usage(&self) -> Result<TierUsage, CacheOperationError>;
}

/// In-memory sorted backend, the default when no durable engine is wired.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheOperationError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, record: Vec<u8>) -> Result<(), CacheOperationError> {
        self.records.write().await.insert(key.to_string(), record);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheOperationError> {
        Ok(self.records.write().await.remove(key).is_some())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, CacheOperationError> {
        let records = self.records.read().await;
        let keys = records
            .range::<String, _>((Bound::Included(prefix.to_string()), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(keys)
    }

    async fn clear(&self) -> Result<(), CacheOperationError> {
        self.records.write().await.clear();
        Ok(())
    }

    async fn usage(&self) -> Result<TierUsage, CacheOperationError> {
        let records = self.records.read().await;
        Ok(TierUsage {
            entries: records.len(),
            bytes: records.values().map(|r| r.len()).sum(),
        })
    }
}

/// Durable tier store over a `KvBackend`.
pub struct PersistentStore {
    backend: Arc<dyn KvBackend>,
    /// Serializes check-then-write for `set_if_absent`; the backend
    /// contract has no compare-and-swap of its own.
    cas_lock: Mutex<()>,
    /// 0 means unlimited.
    max_entries: AtomicUsize,
    available: AtomicBool,
}

impl PersistentStore {
    pub fn new(backend: Arc<dyn KvBackend>, max_entries: Option<usize>) -> Self {
        Self {
            backend,
            cas_lock: Mutex::new(()),
            max_entries: AtomicUsize::new(max_entries.unwrap_or(0)),
            available: AtomicBool::new(true),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), None)
    }

    fn check_available(&self) -> Result<(), CacheOperationError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CacheOperationError::TierUnavailable(TierKind::Persistent))
        }
    }

    fn decode(record: &[u8]) -> Result<CacheEntry, CacheOperationError> {
        serde_json::from_slice(record)
            .map_err(|e| CacheOperationError::storage(format!("record decode failed: {e}")))
    }

    fn encode(entry: &CacheEntry) -> Result<Vec<u8>, CacheOperationError> {
        serde_json::to_vec(entry)
            .map_err(|e| CacheOperationError::storage(format!("record encode failed: {e}")))
    }

    /// Read and decode, treating expired records as absent. The expired
    /// record is removed in passing so scans stay clean.
    async fn read_live(&self, key: &str) -> Result<Option<CacheEntry>, CacheOperationError> {
        match self.backend.read(key).await? {
            Some(record) => {
                let entry = Self::decode(&record)?;
                if entry.is_expired() {
                    let _ = self.backend.remove(key).await;
                    Ok(None)
                } else {
                    Ok(Some(entry))
                }
            }
            None => Ok(None),
        }
    }

    async fn enforce_capacity(&self) -> Result<(), CacheOperationError> {
        let max = self.max_entries.load(Ordering::Acquire);
        if max == 0 {
            return Ok(());
        }
        let usage = self.backend.usage().await?;
        if usage.entries < max {
            return Ok(());
        }
        // Drop expired records first, then the oldest live record.
        let keys = self.backend.scan("").await?;
        let mut oldest: Option<(std::time::SystemTime, String)> = None;
        let mut live = 0usize;
        for key in keys {
            if let Some(record) = self.backend.read(&key).await? {
                let entry = Self::decode(&record)?;
                if entry.is_expired() {
                    let _ = self.backend.remove(&key).await?;
                    continue;
                }
                live += 1;
                if oldest.as_ref().map(|(t, _)| entry.created_at < *t).unwrap_or(true) {
                    oldest = Some((entry.created_at, key));
                }
            }
        }
        if live >= max {
            if let Some((_, key)) = oldest {
                let _ = self.backend.remove(&key).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TierStore for PersistentStore {
    fn kind(&self) -> TierKind {
        TierKind::Persistent
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheOperationError> {
        self.check_available()?;
        self.read_live(key).await
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheOperationError> {
        self.check_available()?;
        self.enforce_capacity().await?;
        let record = Self::encode(&entry)?;
        self.backend.write(&entry.key, record).await
    }

    async fn set_if_absent(&self, entry: CacheEntry) -> Result<bool, CacheOperationError> {
        self.check_available()?;
        let _guard = self.cas_lock.lock().await;
        if self.read_live(&entry.key).await?.is_some() {
            return Ok(false);
        }
        self.enforce_capacity().await?;
        let record = Self::encode(&entry)?;
        self.backend.write(&entry.key, record).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheOperationError> {
        self.check_available()?;
        // A record that only existed in expired form does not count.
        let was_live = self.read_live(key).await?.is_some();
        let removed = self.backend.remove(key).await?;
        Ok(was_live && removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheOperationError> {
        self.check_available()?;
        Ok(self.read_live(key).await?.is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheOperationError> {
        self.check_available()?;
        let mut live = Vec::new();
        for key in self.backend.scan(prefix).await? {
            if self.read_live(&key).await?.is_some() {
                live.push(key);
            }
        }
        Ok(live)
    }

    async fn usage(&self) -> Result<TierUsage, CacheOperationError> {
        self.check_available()?;
        self.backend.usage().await
    }

    async fn clear(&self) -> Result<(), CacheOperationError> {
        self.check_available()?;
        self.backend.clear().await
    }

    async fn purge_expired(&self) -> Result<u64, CacheOperationError> {
        self.check_available()?;
        let mut removed = 0u64;
        for key in self.backend.scan("").await? {
            if let Some(record) = self.backend.read(&key).await? {
                match Self::decode(&record) {
                    Ok(entry) if entry.is_expired() => {
                        if self.backend.remove(&key).await? {
                            removed += 1;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // Undecodable record: drop it rather than let it
                        // poison every future sweep.
                        log::warn!("purging undecodable record {key:?}: {e}");
                        if self.backend.remove(&key).await? {
                            removed += 1;
                        }
                    }
                }
            }
        }
        Ok(removed)
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
    async fn records_round_trip_through_backend() {
        let store = PersistentStore::in_memory();
        let mut tags = BTreeSet::new();
        tags.insert("t1".to_string());
        let original = CacheEntry::new("k", b"payload".to_vec(), None, tags, "ns", 9);
        store.set(original.clone()).await.unwrap();
        let loaded = store.get("k").await.unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn scan_returns_sorted_live_keys() {
        let store = PersistentStore::in_memory();
        store.set(entry("geo:b", b"2", None)).await.unwrap();
        store.set(entry("geo:a", b"1", None)).await.unwrap();
        store
            .set(entry("geo:dead", b"x", Some(Duration::ZERO)))
            .await
            .unwrap();
        store.set(entry("ip:a", b"3", None)).await.unwrap();
        assert_eq!(
            store.scan_prefix("geo:").await.unwrap(),
            vec!["geo:a".to_string(), "geo:b".to_string()]
        );
    }

    #[tokio::test]
    async fn purge_counts_expired_records() {
        let store = PersistentStore::in_memory();
        store
            .set(entry("a", b"1", Some(Duration::ZERO)))
            .await
            .unwrap();
        store.set(entry("b", b"2", None)).await.unwrap();
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.get("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cas_respects_live_entries_only() {
        let store = PersistentStore::in_memory();
        store
            .set(entry("k", b"old", Some(Duration::ZERO)))
            .await
            .unwrap();
        assert!(store.set_if_absent(entry("k", b"new", None)).await.unwrap());
        assert!(!store.set_if_absent(entry("k", b"newer", None)).await.unwrap());
    }
}
