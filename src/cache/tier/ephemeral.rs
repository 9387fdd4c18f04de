//! Ephemeral tier: per-operation scratch storage
//!
//! Scoped to a single logical operation. `begin_scope` opens the window,
//! `end_scope` closes it and drops everything written inside. Outside an
//! active scope the store reads empty and silently drops writes, which is
//! what keeps entries from leaking across operations.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::entry::CacheEntry;
use crate::cache::error::CacheOperationError;
use crate::cache::tier::{TierKind, TierStore, TierUsage};

#[derive(Debug, Default)]
pub struct EphemeralStore {
    entries: DashMap<String, CacheEntry>,
    scope_active: AtomicBool,
    available: AvailabilityFlag,
}

/// AtomicBool that defaults to available.
#[derive(Debug)]
struct AvailabilityFlag(AtomicBool);

impl Default for AvailabilityFlag {
    fn default() -> Self {
        Self(AtomicBool::new(true))
    }
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an operation scope, discarding anything a previous scope left.
    pub fn begin_scope(&self) {
        self.entries.clear();
        self.scope_active.store(true, Ordering::Release);
    }

    /// Close the current scope and drop its entries.
    pub fn end_scope(&self) {
        self.scope_active.store(false, Ordering::Release);
        self.entries.clear();
    }

    pub fn scope_active(&self) -> bool {
        self.scope_active.load(Ordering::Acquire)
    }

    fn check_available(&self) -> Result<(), CacheOperationError> {
        if self.available.0.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CacheOperationError::TierUnavailable(TierKind::Ephemeral))
        }
    }
}

#[async_trait]
impl TierStore for EphemeralStore {
    fn kind(&self) -> TierKind {
        TierKind::Ephemeral
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheOperationError> {
        self.check_available()?;
        if !self.scope_active() {
            return Ok(None);
        }
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
        if !self.scope_active() {
            // No scope, nothing to own the entry's lifetime.
            return Ok(());
        }
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, entry: CacheEntry) -> Result<bool, CacheOperationError> {
        self.check_available()?;
        if !self.scope_active() {
            return Ok(true);
        }
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
        Ok(self.get(key).await?.is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheOperationError> {
        self.check_available()?;
        if !self.scope_active() {
            return Ok(Vec::new());
        }
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

    fn set_available(&self, available: bool) {
        self.available.0.store(available, Ordering::Release);
    }

    fn is_available(&self) -> bool {
        self.available.0.load(Ordering::Acquire)
    }

    fn configure_capacity(&self, _max_entries: Option<usize>) {
        // Scope lifetime bounds this tier, not a capacity limit.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn entry(key: &str, value: &[u8]) -> CacheEntry {
        CacheEntry::new(key, value.to_vec(), None, BTreeSet::new(), "test", 1)
    }

    #[tokio::test]
    async fn invisible_outside_scope() {
        let store = EphemeralStore::new();
        store.set(entry("a", b"1")).await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());

        store.begin_scope();
        store.set(entry("a", b"1")).await.unwrap();
        assert!(store.get("a").await.unwrap().is_some());

        store.end_scope();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scope_boundary_drops_entries() {
        let store = EphemeralStore::new();
        store.begin_scope();
        store.set(entry("a", b"1")).await.unwrap();
        store.end_scope();
        store.begin_scope();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = EphemeralStore::new();
        store.begin_scope();
        store.set_available(false);
        assert!(matches!(
            store.get("a").await,
            Err(CacheOperationError::TierUnavailable(TierKind::Ephemeral))
        ));
    }
}
