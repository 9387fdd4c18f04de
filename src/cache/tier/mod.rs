//! Tier stores: the uniform storage contract and its three implementations
//!
//! Probe order is Ephemeral -> Fast -> Persistent. Every store implements
//! the same async contract so the coordinator can compose them without
//! knowing what sits behind each tier.

pub mod ephemeral;
pub mod fast;
pub mod persistent;

pub use ephemeral::EphemeralStore;
pub use fast::FastStore;
pub use persistent::{KvBackend, MemoryBackend, PersistentStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::entry::CacheEntry;
use crate::cache::error::CacheOperationError;

/// The three ordered cache tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TierKind {
    /// Per-operation scratch tier, no cross-operation visibility.
    Ephemeral,
    /// Shared low-latency tier.
    Fast,
    /// Durable tier with prefix scan support.
    Persistent,
}

impl TierKind {
    /// All tiers in probe order.
    pub const ALL: [TierKind; 3] = [TierKind::Ephemeral, TierKind::Fast, TierKind::Persistent];

    pub fn index(self) -> usize {
        match self {
            TierKind::Ephemeral => 0,
            TierKind::Fast => 1,
            TierKind::Persistent => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TierKind::Ephemeral => "ephemeral",
            TierKind::Fast => "fast",
            TierKind::Persistent => "persistent",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ephemeral" => Some(TierKind::Ephemeral),
            "fast" => Some(TierKind::Fast),
            "persistent" => Some(TierKind::Persistent),
            _ => None,
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Live entry/byte accounting for one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUsage {
    pub entries: usize,
    pub bytes: usize,
}

/// Uniform async storage contract implemented by every tier.
///
/// Expiry is lazy on the read path: `get` and `exists` treat an expired
/// entry as absent (and may drop it). `purge_expired` is the eager sweep
/// used by maintenance for tiers without native TTL eviction.
#[async_trait]
pub trait TierStore: Send + Sync {
    fn kind(&self) -> TierKind;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheOperationError>;

    /// Store an entry. The coordinator has already applied the tier's
    /// effective TTL to `entry.expires_at`.
    async fn set(&self, entry: CacheEntry) -> Result<(), CacheOperationError>;

    /// Atomic insert-if-absent. Returns false (and leaves the existing
    /// entry untouched) when a live entry is already present.
    async fn set_if_absent(&self, entry: CacheEntry) -> Result<bool, CacheOperationError>;

    /// Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheOperationError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheOperationError>;

    /// Keys of live entries starting with `prefix`. An empty prefix scans
    /// the whole tier; scans are non-blocking with respect to writers.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheOperationError>;

    async fn usage(&self) -> Result<TierUsage, CacheOperationError>;

    async fn clear(&self) -> Result<(), CacheOperationError>;

    /// Eagerly drop expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64, CacheOperationError>;

    /// Tier-specific compaction hook. No-op where the tier has no native
    /// concept of compaction.
    async fn optimize(&self) -> Result<(), CacheOperationError> {
        Ok(())
    }

    /// Runtime availability flag. Marking a tier unavailable makes every
    /// operation fail with `TierUnavailable` until it is marked back;
    /// the coordinator degrades by skipping it.
    fn set_available(&self, available: bool);

    fn is_available(&self) -> bool;

    /// Apply a runtime capacity limit (entries). `None` lifts the limit.
    fn configure_capacity(&self, max_entries: Option<usize>);
}
