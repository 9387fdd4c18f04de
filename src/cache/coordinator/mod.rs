//! Coordinator: orchestrates every cache operation across the tiers
//!
//! The coordinator owns the tier handles, the invalidation index and the
//! stats recorder; it holds no per-request state beyond the ephemeral
//! tier's scope. Tier configuration lives in atomics on the handle so
//! `enabled` can be checked on every operation without locking.

mod invalidation;
mod read_write;
mod remember;

pub use invalidation::InvalidationOutcome;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::cache::config::{CacheConfig, ConfigPatch, TierConfig, TierPatch};
use crate::cache::entry::CacheEntry;
use crate::cache::error::CacheOperationError;
use crate::cache::index::InvalidationIndex;
use crate::cache::tier::{
    EphemeralStore, FastStore, PersistentStore, TierKind, TierStore, TierUsage,
};
use crate::telemetry::{StatsRecorder, StatsSnapshot};

/// Write-time metadata for `put`/`remember`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub tags: BTreeSet<String>,
    pub namespace: String,
}

impl PutOptions {
    pub fn tagged(tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            namespace: String::new(),
        }
    }

    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            tags: BTreeSet::new(),
            namespace: namespace.into(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

/// One tier's store plus its runtime-mutable configuration.
pub(crate) struct TierHandle {
    kind: TierKind,
    pub(crate) store: Arc<dyn TierStore>,
    enabled: AtomicBool,
    /// Nanoseconds; 0 means no tier TTL bound.
    default_ttl_ns: AtomicU64,
    /// 0 means unlimited.
    max_entries: AtomicUsize,
}

impl TierHandle {
    fn new(store: Arc<dyn TierStore>, config: &TierConfig) -> Self {
        store.configure_capacity(config.max_entries);
        Self {
            kind: config.kind,
            store,
            enabled: AtomicBool::new(config.enabled),
            default_ttl_ns: AtomicU64::new(ttl_to_ns(config.default_ttl)),
            max_entries: AtomicUsize::new(config.max_entries.unwrap_or(0)),
        }
    }

    pub(crate) fn kind(&self) -> TierKind {
        self.kind
    }

    pub(crate) fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn default_ttl(&self) -> Option<Duration> {
        ns_to_ttl(self.default_ttl_ns.load(Ordering::Acquire))
    }

    /// Per-tier TTL rule: `min(requested, tier default)`. A `None`
    /// request means no expiry (the remember-forever contract) and is
    /// never narrowed by the tier default; the default still refreshes
    /// backfilled copies.
    pub(crate) fn effective_ttl(&self, requested: Option<Duration>) -> Option<Duration> {
        match (requested, self.default_ttl()) {
            (Some(req), Some(def)) => Some(req.min(def)),
            (Some(req), None) => Some(req),
            (None, _) => None,
        }
    }

    fn config(&self) -> TierConfig {
        let max = self.max_entries.load(Ordering::Acquire);
        TierConfig {
            kind: self.kind,
            enabled: self.enabled(),
            default_ttl: self.default_ttl(),
            max_entries: (max != 0).then_some(max),
        }
    }

    fn apply_patch(&self, patch: &TierPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled.store(enabled, Ordering::Release);
        }
        if let Some(ttl) = patch.default_ttl {
            self.default_ttl_ns.store(ttl_to_ns(ttl), Ordering::Release);
        }
        if let Some(max) = patch.max_entries {
            self.max_entries.store(max.unwrap_or(0), Ordering::Release);
            self.store.configure_capacity(max);
        }
    }
}

fn ttl_to_ns(ttl: Option<Duration>) -> u64 {
    ttl.map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

fn ns_to_ttl(ns: u64) -> Option<Duration> {
    (ns != 0).then(|| Duration::from_nanos(ns))
}

/// Result state of an in-flight `remember` load, broadcast to waiters.
#[derive(Debug, Clone)]
pub(crate) enum FlightState {
    Pending,
    Done(Result<Vec<u8>, CacheOperationError>),
}

type InvalidateHook = Box<dyn Fn(&str) + Send + Sync>;

pub(crate) struct CoordinatorInner {
    pub(crate) tiers: [TierHandle; 3],
    /// Concrete handle kept for scope control; also tiers[0].store.
    pub(crate) ephemeral: Arc<EphemeralStore>,
    pub(crate) index: InvalidationIndex,
    pub(crate) stats: StatsRecorder,
    pub(crate) flights: DashMap<String, watch::Receiver<FlightState>>,
    hooks: Mutex<Vec<InvalidateHook>>,
    pub(crate) remember_wait_ns: AtomicU64,
    pub(crate) invalidation_batch: AtomicUsize,
    /// Fixed at construction; echoed back by `config()`.
    latency_sample_capacity: usize,
    pub(crate) write_version: AtomicU64,
}

/// The multi-level cache coordination engine. Cheap to clone; all clones
/// share the same tiers, index and statistics.
#[derive(Clone)]
pub struct Coordinator {
    pub(crate) inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    /// Build a coordinator with the default in-process stores.
    pub fn new(config: CacheConfig) -> Self {
        let ephemeral = Arc::new(EphemeralStore::new());
        let fast = Arc::new(FastStore::new(config.tier(TierKind::Fast).max_entries));
        let persistent = Arc::new(PersistentStore::in_memory());
        Self::with_stores(config, ephemeral, fast, persistent)
    }

    /// Build a coordinator over caller-supplied stores, e.g. a persistent
    /// tier wired to a real database backend.
    pub fn with_stores(
        config: CacheConfig,
        ephemeral: Arc<EphemeralStore>,
        fast: Arc<dyn TierStore>,
        persistent: Arc<dyn TierStore>,
    ) -> Self {
        let tiers = [
            TierHandle::new(ephemeral.clone(), config.tier(TierKind::Ephemeral)),
            TierHandle::new(fast, config.tier(TierKind::Fast)),
            TierHandle::new(persistent, config.tier(TierKind::Persistent)),
        ];
        Self {
            inner: Arc::new(CoordinatorInner {
                tiers,
                ephemeral,
                index: InvalidationIndex::new(),
                stats: StatsRecorder::new(config.latency_sample_capacity),
                flights: DashMap::new(),
                hooks: Mutex::new(Vec::new()),
                remember_wait_ns: AtomicU64::new(
                    config.remember_wait.as_nanos().min(u64::MAX as u128) as u64,
                ),
                invalidation_batch: AtomicUsize::new(config.invalidation_batch.max(1)),
                latency_sample_capacity: config.latency_sample_capacity,
                write_version: AtomicU64::new(1),
            }),
        }
    }

    /// Open the ephemeral tier's operation scope.
    pub fn begin_scope(&self) {
        self.inner.ephemeral.begin_scope();
    }

    /// Close the ephemeral scope, dropping everything written inside it.
    pub fn end_scope(&self) {
        self.inner.ephemeral.end_scope();
    }

    /// Enable or disable a tier at runtime. A disabled tier is skipped
    /// transparently by every operation.
    pub fn toggle_tier(&self, kind: TierKind, enabled: bool) -> bool {
        self.inner.tiers[kind.index()]
            .enabled
            .store(enabled, Ordering::Release);
        true
    }

    /// Mark a tier's store up or down without touching its configuration.
    pub fn mark_tier_available(&self, kind: TierKind, available: bool) {
        self.inner.tiers[kind.index()].store.set_available(available);
    }

    /// Apply a runtime configuration patch.
    pub fn update_config(&self, patch: &ConfigPatch) -> bool {
        for tier_patch in &patch.tiers {
            self.inner.tiers[tier_patch.kind.index()].apply_patch(tier_patch);
        }
        if let Some(wait) = patch.remember_wait {
            self.inner
                .remember_wait_ns
                .store(wait.as_nanos().min(u64::MAX as u128) as u64, Ordering::Release);
        }
        if let Some(batch) = patch.invalidation_batch {
            self.inner
                .invalidation_batch
                .store(batch.max(1), Ordering::Release);
        }
        true
    }

    /// Current effective configuration.
    pub fn config(&self) -> CacheConfig {
        CacheConfig {
            tiers: [
                self.inner.tiers[0].config(),
                self.inner.tiers[1].config(),
                self.inner.tiers[2].config(),
            ],
            remember_wait: Duration::from_nanos(self.inner.remember_wait_ns.load(Ordering::Acquire)),
            invalidation_batch: self.inner.invalidation_batch.load(Ordering::Acquire),
            latency_sample_capacity: self.inner.latency_sample_capacity,
        }
    }

    /// Register an observer invoked with each invalidated key.
    pub fn on_invalidate(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        let mut hooks = self
            .inner
            .hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        hooks.push(Box::new(hook));
    }

    pub(crate) fn notify_invalidated(&self, key: &str) {
        let hooks = self
            .inner
            .hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for hook in hooks.iter() {
            hook(key);
        }
    }

    pub(crate) fn stores(&self) -> Vec<Arc<dyn TierStore>> {
        self.inner.tiers.iter().map(|t| t.store.clone()).collect()
    }

    pub(crate) fn index(&self) -> &InvalidationIndex {
        &self.inner.index
    }

    /// Direct store access, used by maintenance and tests.
    pub fn tier_store(&self, kind: TierKind) -> Arc<dyn TierStore> {
        self.inner.tiers[kind.index()].store.clone()
    }

    pub(crate) async fn tier_usages(&self) -> [TierUsage; 3] {
        let mut usages = [TierUsage::default(); 3];
        for handle in &self.inner.tiers {
            if handle.enabled() && handle.store.is_available() {
                if let Ok(usage) = handle.store.usage().await {
                    usages[handle.kind().index()] = usage;
                }
            }
        }
        usages
    }

    /// Per-tier and aggregate statistics with live usage figures.
    pub async fn stats(&self) -> StatsSnapshot {
        let usages = self.tier_usages().await;
        self.inner.stats.snapshot(usages)
    }

    /// Zero all statistics counters atomically.
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    pub(crate) fn next_version(&self) -> u64 {
        self.inner.write_version.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn remember_wait(&self) -> Duration {
        Duration::from_nanos(self.inner.remember_wait_ns.load(Ordering::Acquire))
    }

    /// Build the per-tier entry for a write: base metadata shared, TTL
    /// bounded by the receiving tier.
    pub(crate) fn tier_entry(
        &self,
        base: &CacheEntry,
        requested_ttl: Option<Duration>,
        handle: &TierHandle,
    ) -> CacheEntry {
        base.with_ttl(handle.effective_ttl(requested_ttl))
    }
}
