//! Core read/write path: get with backfill, put, add, forget, flush
//!
//! Degradation rules: a single failing tier is skipped and logged; an
//! operation only fails when every enabled tier failed. Backfill is
//! dispatched fire-and-forget so the read returns as soon as the
//! authoritative value is known.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::cache::coordinator::{Coordinator, PutOptions};
use crate::cache::entry::CacheEntry;
use crate::cache::error::CacheOperationError;
use crate::cache::key::KeyCodec;
use crate::cache::tier::TierKind;

impl Coordinator {
    /// Probe tiers in order, backfilling faster tiers on a deep hit.
    /// Returns `Ok(None)` only when every enabled tier missed.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheOperationError> {
        Ok(self.lookup(key, true).await?.map(|entry| entry.value))
    }

    /// Shared probe used by `get` and `remember`'s double-check. Stats
    /// recording is suppressed on the double-check so a single logical
    /// read is not counted twice.
    pub(crate) async fn lookup(
        &self,
        key: &str,
        record_stats: bool,
    ) -> Result<Option<CacheEntry>, CacheOperationError> {
        KeyCodec::check_raw(key)?;

        let mut answered = false;
        let mut failures = 0usize;
        for (position, handle) in self.inner.tiers.iter().enumerate() {
            if !handle.enabled() {
                continue;
            }
            let started = Instant::now();
            match handle.store.get(key).await {
                Ok(Some(entry)) => {
                    if record_stats {
                        self.inner.stats.record_hit(handle.kind(), started.elapsed());
                    }
                    if position > 0 {
                        self.spawn_backfill(position, entry.clone());
                    }
                    return Ok(Some(entry));
                }
                Ok(None) => {
                    answered = true;
                    if record_stats {
                        self.inner
                            .stats
                            .record_miss(handle.kind(), started.elapsed());
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!("get({key}): {} tier degraded: {e}", handle.kind());
                }
            }
        }

        if !answered && failures > 0 {
            return Err(CacheOperationError::CacheUnavailable);
        }
        Ok(None)
    }

    /// Backfill tiers above the hit position with the authoritative value,
    /// each under its own default TTL. A failed backfill never fails the
    /// read; it is logged and abandoned.
    fn spawn_backfill(&self, hit_position: usize, entry: CacheEntry) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            for handle in coordinator.inner.tiers[..hit_position].iter() {
                if !handle.enabled() {
                    continue;
                }
                let refreshed = entry.with_ttl(handle.default_ttl());
                if let Err(e) = handle.store.set(refreshed).await {
                    debug!(
                        "backfill of {:?} into {} tier failed: {e}",
                        entry.key,
                        handle.kind()
                    );
                }
            }
        });
    }

    /// Write to every enabled tier, bounding the TTL per tier, and record
    /// tags/namespace in the invalidation index before reporting success.
    pub async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        options: &PutOptions,
    ) -> Result<bool, CacheOperationError> {
        KeyCodec::check_raw(key)?;
        let base = CacheEntry::new(
            key,
            value,
            ttl,
            options.tags.clone(),
            options.namespace.clone(),
            self.next_version(),
        );

        let mut attempted = 0usize;
        let mut stored = 0usize;
        for handle in &self.inner.tiers {
            if !handle.enabled() {
                continue;
            }
            attempted += 1;
            let entry = self.tier_entry(&base, ttl, handle);
            match handle.store.set(entry).await {
                Ok(()) => stored += 1,
                Err(e) => warn!("put({key}): {} tier degraded: {e}", handle.kind()),
            }
        }

        if attempted > 0 && stored == 0 {
            return Err(CacheOperationError::CacheUnavailable);
        }
        if stored > 0 {
            self.inner.index.record(key, &options.tags, &options.namespace);
            return Ok(true);
        }
        Ok(false)
    }

    /// Insert only if the key is absent from every enabled tier. The
    /// first reachable shared tier arbitrates via compare-and-swap;
    /// on success the value is propagated to the remaining tiers.
    pub async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheOperationError> {
        KeyCodec::check_raw(key)?;

        for handle in &self.inner.tiers {
            if !handle.enabled() {
                continue;
            }
            match handle.store.exists(key).await {
                Ok(true) => return Ok(false),
                Ok(false) => {}
                Err(e) => warn!("add({key}): {} tier degraded: {e}", handle.kind()),
            }
        }

        let base = CacheEntry::new(
            key,
            value,
            ttl,
            BTreeSet::new(),
            String::new(),
            self.next_version(),
        );

        // The first shared tier that can answer the CAS is the authority;
        // the rest receive plain writes of the winning entry. The
        // ephemeral tier is scope-local and cannot arbitrate across
        // callers, so it only arbitrates when it is the sole enabled tier.
        let mut authority_settled = false;
        let mut attempted = 0usize;
        for handle in &self.inner.tiers {
            if !handle.enabled() || handle.kind() == TierKind::Ephemeral {
                continue;
            }
            attempted += 1;
            let entry = self.tier_entry(&base, ttl, handle);
            if !authority_settled {
                match handle.store.set_if_absent(entry).await {
                    Ok(true) => authority_settled = true,
                    Ok(false) => return Ok(false),
                    Err(e) => {
                        warn!("add({key}): {} tier degraded: {e}", handle.kind());
                    }
                }
            } else if let Err(e) = handle.store.set(entry).await {
                warn!("add({key}): {} tier degraded: {e}", handle.kind());
            }
        }

        let ephemeral = &self.inner.tiers[TierKind::Ephemeral.index()];
        if ephemeral.enabled() {
            let entry = self.tier_entry(&base, ttl, ephemeral);
            if attempted == 0 {
                // Sole enabled tier: its entry API still provides CAS
                // within the scope.
                attempted += 1;
                match ephemeral.store.set_if_absent(entry).await {
                    Ok(true) => authority_settled = true,
                    Ok(false) => return Ok(false),
                    Err(e) => {
                        warn!("add({key}): {} tier degraded: {e}", ephemeral.kind());
                    }
                }
            } else if authority_settled {
                if let Err(e) = ephemeral.store.set(entry).await {
                    warn!("add({key}): {} tier degraded: {e}", ephemeral.kind());
                }
            }
        }

        if attempted == 0 {
            return Ok(false);
        }
        if !authority_settled {
            return Err(CacheOperationError::CacheUnavailable);
        }
        Ok(true)
    }

    /// Delete from every tier (disabled ones included, so a re-enabled
    /// tier cannot resurrect the key) and drop index references.
    /// Idempotent: a second call returns `false`.
    pub async fn forget(&self, key: &str) -> Result<bool, CacheOperationError> {
        KeyCodec::check_raw(key)?;
        let mut removed = false;
        for handle in &self.inner.tiers {
            match handle.store.delete(key).await {
                Ok(was_present) => removed = removed || was_present,
                Err(e) => warn!("forget({key}): {} tier degraded: {e}", handle.kind()),
            }
        }
        self.inner.index.remove_key(key);
        self.notify_invalidated(key);
        Ok(removed)
    }

    /// Empty one tier, or all of them. Flushing everything clears the
    /// index outright; a single-tier flush prunes index entries whose
    /// keys no longer exist anywhere.
    pub async fn flush(&self, tier: Option<TierKind>) -> Result<bool, CacheOperationError> {
        match tier {
            Some(kind) => {
                self.inner.tiers[kind.index()].store.clear().await?;
                let stores = self.stores();
                if let Err(e) = self.inner.index.prune_missing(&stores).await {
                    warn!("flush({kind}): index prune failed: {e}");
                }
                Ok(true)
            }
            None => {
                let mut attempted = 0usize;
                let mut cleared = 0usize;
                for handle in &self.inner.tiers {
                    attempted += 1;
                    match handle.store.clear().await {
                        Ok(()) => cleared += 1,
                        Err(e) => warn!("flush: {} tier degraded: {e}", handle.kind()),
                    }
                }
                self.inner.index.clear();
                if attempted > 0 && cleared == 0 {
                    return Err(CacheOperationError::CacheUnavailable);
                }
                Ok(true)
            }
        }
    }
}
