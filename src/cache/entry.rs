//! The versioned cache entry shared by every tier
//!
//! Values are opaque byte payloads; tags, namespace and expiry travel
//! with the entry so the persistent tier can rebuild the invalidation
//! index from a raw scan. `expires_at = None` pins the entry until it is
//! explicitly invalidated.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub tags: BTreeSet<String>,
    pub namespace: String,
    pub created_at: SystemTime,
    pub expires_at: Option<SystemTime>,
    /// Monotonic write version assigned by the coordinator.
    pub version: u64,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        value: Vec<u8>,
        ttl: Option<Duration>,
        tags: BTreeSet<String>,
        namespace: impl Into<String>,
        version: u64,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            key: key.into(),
            value,
            tags,
            namespace: namespace.into(),
            created_at: now,
            expires_at: ttl.map(|d| now + d),
            version,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        match self.expires_at {
            Some(deadline) => deadline <= now,
            None => false,
        }
    }

    /// Copy of this entry with its expiry recomputed from now. Used when
    /// a tier applies its own TTL bound to a shared base entry.
    pub fn with_ttl(&self, ttl: Option<Duration>) -> Self {
        let mut copy = self.clone();
        copy.expires_at = ttl.map(|d| SystemTime::now() + d);
        copy
    }

    /// Rough in-memory footprint used for byte accounting.
    pub fn estimated_size(&self) -> usize {
        self.key.len()
            + self.value.len()
            + self.namespace.len()
            + self.tags.iter().map(|t| t.len()).sum::<usize>()
            + std::mem::size_of::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ttl_expires_immediately() {
        let entry = CacheEntry::new(
            "k",
            b"v".to_vec(),
            Some(Duration::ZERO),
            BTreeSet::new(),
            "",
            1,
        );
        assert!(entry.is_expired());
    }

    #[test]
    fn no_ttl_never_expires() {
        let entry = CacheEntry::new("k", b"v".to_vec(), None, BTreeSet::new(), "", 1);
        assert!(!entry.is_expired());
        assert!(!entry.is_expired_at(SystemTime::now() + Duration::from_secs(86_400)));
    }

    #[test]
    fn with_ttl_rebases_expiry_only() {
        let entry = CacheEntry::new("k", b"v".to_vec(), None, BTreeSet::new(), "", 1);
        let bounded = entry.with_ttl(Some(Duration::from_secs(60)));
        assert_eq!(bounded.value, entry.value);
        assert_eq!(bounded.created_at, entry.created_at);
        assert!(bounded.expires_at.is_some());
        let cleared = bounded.with_ttl(None);
        assert!(cleared.expires_at.is_none());
    }
}
