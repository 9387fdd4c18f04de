//! Engine and per-tier configuration
//!
//! Tier configs are runtime-mutable: the coordinator holds them as atomics
//! and checks `enabled` on every operation, so toggling a tier never
//! requires reconstructing anything.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::tier::TierKind;

/// Configuration for one cache tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub kind: TierKind,
    pub enabled: bool,
    /// Bounds explicit write TTLs on this tier and refreshes backfilled
    /// copies. `None` means the tier imposes no bound of its own. A
    /// write with no TTL at all (remember-forever) is never narrowed.
    pub default_ttl: Option<Duration>,
    /// Entry capacity; `None` means unlimited.
    pub max_entries: Option<usize>,
}

impl TierConfig {
    pub fn new(kind: TierKind) -> Self {
        match kind {
            TierKind::Ephemeral => Self {
                kind,
                enabled: true,
                default_ttl: None,
                max_entries: None,
            },
            TierKind::Fast => Self {
                kind,
                enabled: true,
                default_ttl: Some(Duration::from_secs(300)),
                max_entries: Some(100_000),
            },
            TierKind::Persistent => Self {
                kind,
                enabled: true,
                default_ttl: Some(Duration::from_secs(3600)),
                max_entries: None,
            },
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub tiers: [TierConfig; 3],
    /// Bound on how long a `remember` waiter blocks on another caller's
    /// in-flight loader before surfacing `LoaderTimeout`.
    pub remember_wait: Duration,
    /// Chunk size for bulk invalidation passes.
    pub invalidation_batch: usize,
    /// Ring-buffer capacity for per-tier latency samples.
    pub latency_sample_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tiers: [
                TierConfig::new(TierKind::Ephemeral),
                TierConfig::new(TierKind::Fast),
                TierConfig::new(TierKind::Persistent),
            ],
            remember_wait: Duration::from_secs(5),
            invalidation_batch: 256,
            latency_sample_capacity: 1024,
        }
    }
}

impl CacheConfig {
    pub fn tier(&self, kind: TierKind) -> &TierConfig {
        &self.tiers[kind.index()]
    }

    pub fn tier_mut(&mut self, kind: TierKind) -> &mut TierConfig {
        &mut self.tiers[kind.index()]
    }
}

/// Runtime configuration patch. `None` fields leave the current value
/// untouched; the nested `Option` on TTL/capacity distinguishes "do not
/// change" from "clear the limit".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default)]
    pub tiers: Vec<TierPatch>,
    pub remember_wait: Option<Duration>,
    pub invalidation_batch: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPatch {
    pub kind: TierKind,
    pub enabled: Option<bool>,
    pub default_ttl: Option<Option<Duration>>,
    pub max_entries: Option<Option<usize>>,
}

impl TierPatch {
    pub fn enable(kind: TierKind, enabled: bool) -> Self {
        Self {
            kind,
            enabled: Some(enabled),
            default_ttl: None,
            max_entries: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_all_tiers() {
        let config = CacheConfig::default();
        assert!(config.tiers.iter().all(|t| t.enabled));
        assert_eq!(config.tier(TierKind::Fast).kind, TierKind::Fast);
    }

    #[test]
    fn patch_round_trips_through_json() {
        let patch = ConfigPatch {
            tiers: vec![TierPatch {
                kind: TierKind::Fast,
                enabled: Some(false),
                default_ttl: Some(None),
                max_entries: Some(Some(10)),
            }],
            remember_wait: Some(Duration::from_secs(1)),
            invalidation_batch: None,
        };
        let json = serde_json::to_string(&patch).unwrap();
        let back: ConfigPatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tiers[0].enabled, Some(false));
        assert_eq!(back.remember_wait, Some(Duration::from_secs(1)));
    }
}
