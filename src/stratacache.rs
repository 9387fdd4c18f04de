//! Simple public API for the stratacache engine
//!
//! A user-friendly facade over the coordinator, warmer and maintainer.
//! Values are opaque byte payloads; serialize at the call site. The
//! handle is cheap to clone and safe for concurrent use from many tasks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::config::{CacheConfig, ConfigPatch, TierConfig};
use crate::cache::coordinator::{Coordinator, PutOptions};
use crate::cache::error::CacheOperationError;
use crate::cache::maintainer::{MaintenanceOp, MaintenanceReport, Maintainer};
use crate::cache::tier::{
    EphemeralStore, FastStore, KvBackend, PersistentStore, TierKind, TierStore,
};
use crate::cache::warmer::{WarmEntry, WarmOutcome, Warmer};
use crate::telemetry::{StatsSnapshot, TierStatsSnapshot};

use std::collections::BTreeMap;

/// Multi-level cache engine handle.
#[derive(Clone)]
pub struct StrataCache {
    coordinator: Coordinator,
    warmer: Warmer,
    maintainer: Maintainer,
}

impl StrataCache {
    /// Engine with default configuration and in-process stores.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> StrataCacheBuilder {
        StrataCacheBuilder::default()
    }

    /// Probe Ephemeral -> Fast -> Persistent; backfills faster tiers on
    /// a deep hit. `Ok(None)` means every enabled tier missed.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheOperationError> {
        self.coordinator.get(key).await
    }

    /// Write to all enabled tiers with per-tier TTL bounding and record
    /// tags/namespace for bulk invalidation.
    pub async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        options: PutOptions,
    ) -> Result<bool, CacheOperationError> {
        self.coordinator.put(key, value, ttl, &options).await
    }

    /// Cache-or-compute. The loader runs at most once per key across
    /// concurrent callers; waiters share the leader's result.
    pub async fn remember<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<Vec<u8>, CacheOperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, CacheOperationError>> + Send,
    {
        self.coordinator
            .remember(key, ttl, &PutOptions::default(), loader)
            .await
    }

    /// `remember` with write-time tags/namespace on the cached value.
    pub async fn remember_with<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        options: PutOptions,
        loader: F,
    ) -> Result<Vec<u8>, CacheOperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, CacheOperationError>> + Send,
    {
        self.coordinator.remember(key, ttl, &options, loader).await
    }

    /// `remember` without expiry; the entry lives until invalidated.
    pub async fn remember_forever<F, Fut>(
        &self,
        key: &str,
        loader: F,
    ) -> Result<Vec<u8>, CacheOperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, CacheOperationError>> + Send,
    {
        self.coordinator
            .remember_forever(key, &PutOptions::default(), loader)
            .await
    }

    /// Insert only if absent from every enabled tier; `false` leaves any
    /// existing value untouched.
    pub async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheOperationError> {
        self.coordinator.add(key, value, ttl).await
    }

    /// Delete from every tier and drop index references.
    pub async fn forget(&self, key: &str) -> Result<bool, CacheOperationError> {
        self.coordinator.forget(key).await
    }

    /// Remove every key carrying `tag`; returns the count invalidated.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<u64, CacheOperationError> {
        let outcome = self
            .coordinator
            .invalidate_by_tag(tag, &CancellationToken::new())
            .await?;
        Ok(outcome.removed)
    }

    /// Remove every key in `namespace`; returns the count invalidated.
    pub async fn invalidate_by_namespace(
        &self,
        namespace: &str,
    ) -> Result<u64, CacheOperationError> {
        let outcome = self
            .coordinator
            .invalidate_by_namespace(namespace, &CancellationToken::new())
            .await?;
        Ok(outcome.removed)
    }

    /// Remove every key matching the glob; returns the count invalidated.
    pub async fn invalidate_by_pattern(&self, glob: &str) -> Result<u64, CacheOperationError> {
        let outcome = self
            .coordinator
            .invalidate_by_pattern(glob, &CancellationToken::new())
            .await?;
        Ok(outcome.removed)
    }

    /// Empty one tier, or all tiers when `tier` is `None`.
    pub async fn flush(&self, tier: Option<TierKind>) -> Result<bool, CacheOperationError> {
        self.coordinator.flush(tier).await
    }

    /// Per-tier and aggregate statistics.
    pub async fn get_stats(&self) -> StatsSnapshot {
        self.coordinator.stats().await
    }

    /// Statistics for a single tier.
    pub async fn tier_stats(&self, kind: TierKind) -> TierStatsSnapshot {
        *self.coordinator.stats().await.tier(kind)
    }

    pub fn reset_stats(&self) {
        self.coordinator.reset_stats();
    }

    /// Run named warm tasks (all registered when `names` is empty).
    pub async fn warm(&self, names: &[String]) -> BTreeMap<String, WarmOutcome> {
        self.warmer.warm(names, &CancellationToken::new()).await
    }

    /// Cancellable warm run.
    pub async fn warm_with_cancel(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> BTreeMap<String, WarmOutcome> {
        self.warmer.warm(names, cancel).await
    }

    /// Register a named warm task.
    pub fn register_warm_task<F, Fut>(&self, name: impl Into<String>, producer: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<WarmEntry>, CacheOperationError>> + Send + 'static,
    {
        self.warmer.register(name, producer);
    }

    /// Run maintenance operations (all of them when `ops` is empty) with
    /// per-operation results.
    pub async fn maintenance(
        &self,
        ops: &[MaintenanceOp],
    ) -> BTreeMap<String, Result<MaintenanceReport, CacheOperationError>> {
        self.maintainer
            .maintenance(ops, &CancellationToken::new())
            .await
    }

    /// Cancellable maintenance run.
    pub async fn maintenance_with_cancel(
        &self,
        ops: &[MaintenanceOp],
        cancel: &CancellationToken,
    ) -> BTreeMap<String, Result<MaintenanceReport, CacheOperationError>> {
        self.maintainer.maintenance(ops, cancel).await
    }

    /// Enable or disable a tier at runtime.
    pub fn toggle_tier(&self, kind: TierKind, enabled: bool) -> bool {
        self.coordinator.toggle_tier(kind, enabled)
    }

    /// Apply a runtime configuration patch.
    pub fn update_config(&self, patch: &ConfigPatch) -> bool {
        self.coordinator.update_config(patch)
    }

    pub fn config(&self) -> CacheConfig {
        self.coordinator.config()
    }

    /// Open the ephemeral tier's per-operation scope.
    pub fn begin_scope(&self) {
        self.coordinator.begin_scope();
    }

    /// Close the scope, dropping everything written inside it.
    pub fn end_scope(&self) {
        self.coordinator.end_scope();
    }

    /// Observe invalidations; the hook receives each invalidated key.
    pub fn on_invalidate(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.coordinator.on_invalidate(hook);
    }

    /// Mark a tier's store up or down (operational control, distinct
    /// from the `enabled` configuration flag).
    pub fn mark_tier_available(&self, kind: TierKind, available: bool) {
        self.coordinator.mark_tier_available(kind, available);
    }

    /// Escape hatch for tests and embedders needing direct store access.
    pub fn tier_store(&self, kind: TierKind) -> Arc<dyn TierStore> {
        self.coordinator.tier_store(kind)
    }
}

impl Default for StrataCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent builder for the engine.
pub struct StrataCacheBuilder {
    config: CacheConfig,
    persistent_backend: Option<Arc<dyn KvBackend>>,
    persistent_store: Option<Arc<dyn TierStore>>,
    fast_store: Option<Arc<dyn TierStore>>,
}

impl Default for StrataCacheBuilder {
    fn default() -> Self {
        Self {
            config: CacheConfig::default(),
            persistent_backend: None,
            persistent_store: None,
            fast_store: None,
        }
    }
}

impl StrataCacheBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tier_config(mut self, tier: TierConfig) -> Self {
        let slot = tier.kind.index();
        self.config.tiers[slot] = tier;
        self
    }

    pub fn tier_enabled(mut self, kind: TierKind, enabled: bool) -> Self {
        self.config.tier_mut(kind).enabled = enabled;
        self
    }

    pub fn tier_ttl(mut self, kind: TierKind, ttl: Option<Duration>) -> Self {
        self.config.tier_mut(kind).default_ttl = ttl;
        self
    }

    pub fn tier_capacity(mut self, kind: TierKind, max_entries: Option<usize>) -> Self {
        self.config.tier_mut(kind).max_entries = max_entries;
        self
    }

    /// Bound on how long `remember` waiters block on another caller's
    /// loader.
    pub fn remember_wait(mut self, wait: Duration) -> Self {
        self.config.remember_wait = wait;
        self
    }

    pub fn invalidation_batch(mut self, batch: usize) -> Self {
        self.config.invalidation_batch = batch;
        self
    }

    pub fn latency_sample_capacity(mut self, capacity: usize) -> Self {
        self.config.latency_sample_capacity = capacity;
        self
    }

    /// Wire the persistent tier to an external key-value engine.
    pub fn persistent_backend(mut self, backend: Arc<dyn KvBackend>) -> Self {
        self.persistent_backend = Some(backend);
        self
    }

    /// Replace the entire persistent tier store.
    pub fn persistent_store(mut self, store: Arc<dyn TierStore>) -> Self {
        self.persistent_store = Some(store);
        self
    }

    /// Replace the fast tier store, e.g. with a networked cache client.
    pub fn fast_store(mut self, store: Arc<dyn TierStore>) -> Self {
        self.fast_store = Some(store);
        self
    }

    pub fn build(self) -> StrataCache {
        let ephemeral = Arc::new(EphemeralStore::new());
        let fast: Arc<dyn TierStore> = self.fast_store.unwrap_or_else(|| {
            Arc::new(FastStore::new(self.config.tier(TierKind::Fast).max_entries))
        });
        let persistent: Arc<dyn TierStore> = match (self.persistent_store, self.persistent_backend)
        {
            (Some(store), _) => store,
            (None, Some(backend)) => Arc::new(PersistentStore::new(
                backend,
                self.config.tier(TierKind::Persistent).max_entries,
            )),
            (None, None) => Arc::new(PersistentStore::in_memory()),
        };

        let coordinator = Coordinator::with_stores(self.config, ephemeral, fast, persistent);
        let warmer = Warmer::new(coordinator.clone());
        let maintainer = Maintainer::new(coordinator.clone());
        StrataCache {
            coordinator,
            warmer,
            maintainer,
        }
    }
}
