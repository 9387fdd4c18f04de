//! Remember: cache-or-compute with thundering-herd suppression
//!
//! Concurrent callers for the same uncached key elect one leader through
//! the in-flight table; the leader runs the loader exactly once and
//! broadcasts the outcome over a watch channel. Waiters block for at most
//! the configured `remember_wait` before surfacing `LoaderTimeout`, so a
//! hung loader can never strand them indefinitely.

use std::future::Future;
use std::time::Duration;

use log::warn;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::cache::coordinator::{Coordinator, FlightState, PutOptions};
use crate::cache::error::CacheOperationError;

enum FlightRole {
    Leader(watch::Sender<FlightState>),
    Waiter(watch::Receiver<FlightState>),
}

/// Deregisters the flight when the leader finishes, or when its future is
/// dropped mid-load (task abort, caller-side timeout). Without this an
/// abandoned leader would strand the key: the entry stays in the table
/// with its sender gone, and every later caller joins a dead flight.
struct FlightGuard {
    coordinator: Coordinator,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.coordinator.inner.flights.remove(&self.key);
    }
}

impl Coordinator {
    /// Get the cached value, or compute it via `loader` and cache the
    /// result under `ttl`. The loader runs at most once per key across
    /// concurrent callers; a loader error is cached nowhere and
    /// propagated to every waiter.
    pub async fn remember<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        options: &PutOptions,
        loader: F,
    ) -> Result<Vec<u8>, CacheOperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, CacheOperationError>> + Send,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        match self.join_flight(key) {
            FlightRole::Leader(tx) => self.lead_flight(key, ttl, options, loader, tx).await,
            FlightRole::Waiter(rx) => self.await_flight(rx).await,
        }
    }

    /// `remember` without expiry: the entry persists until explicitly
    /// invalidated.
    pub async fn remember_forever<F, Fut>(
        &self,
        key: &str,
        options: &PutOptions,
        loader: F,
    ) -> Result<Vec<u8>, CacheOperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, CacheOperationError>> + Send,
    {
        self.remember(key, None, options, loader).await
    }

    fn join_flight(&self, key: &str) -> FlightRole {
        match self.inner.flights.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                FlightRole::Waiter(occupied.get().clone())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(FlightState::Pending);
                vacant.insert(rx);
                FlightRole::Leader(tx)
            }
        }
    }

    async fn lead_flight<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        options: &PutOptions,
        loader: F,
        tx: watch::Sender<FlightState>,
    ) -> Result<Vec<u8>, CacheOperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, CacheOperationError>> + Send,
    {
        let guard = FlightGuard {
            coordinator: self.clone(),
            key: key.to_string(),
        };
        let result = self.load_and_store(key, ttl, options, loader).await;
        // Deregister before broadcasting: by now the value is in the
        // cache (success) or there is nothing to wait on (error), so a
        // brand-new caller must start fresh rather than observe a
        // completed flight.
        drop(guard);
        let _ = tx.send(FlightState::Done(result.clone()));
        result
    }

    async fn load_and_store<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        options: &PutOptions,
        loader: F,
    ) -> Result<Vec<u8>, CacheOperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, CacheOperationError>> + Send,
    {
        // Double-check under flight ownership: a put may have landed
        // between the miss and the flight election.
        if let Ok(Some(entry)) = self.lookup(key, false).await {
            return Ok(entry.value);
        }

        match loader().await {
            Ok(value) => {
                if let Err(e) = self.put(key, value.clone(), ttl, options).await {
                    // The value is authoritative regardless; callers get
                    // it even when no tier could store it.
                    warn!("remember({key}): caching loaded value failed: {e}");
                }
                Ok(value)
            }
            Err(e) => Err(match e {
                CacheOperationError::LoaderError(_) => e,
                other => CacheOperationError::loader(other.to_string()),
            }),
        }
    }

    async fn await_flight(
        &self,
        mut rx: watch::Receiver<FlightState>,
    ) -> Result<Vec<u8>, CacheOperationError> {
        let wait = self.remember_wait();
        let outcome = timeout(
            wait,
            rx.wait_for(|state| matches!(state, FlightState::Done(_))),
        )
        .await;

        match outcome {
            Ok(Ok(state)) => match &*state {
                FlightState::Done(result) => result.clone(),
                // wait_for only yields Done; Pending here means the
                // channel misbehaved, treat it as an abandoned load.
                FlightState::Pending => Err(CacheOperationError::loader("loader abandoned")),
            },
            // Sender dropped without broadcasting; treat as a failed load.
            Ok(Err(_)) => Err(CacheOperationError::loader("loader abandoned")),
            Err(_) => Err(CacheOperationError::LoaderTimeout),
        }
    }
}
