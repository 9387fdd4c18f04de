//! Engine telemetry: per-tier hit/miss counters and latency sampling
//!
//! Counters are cache-padded atomics so hot-path recording never contends
//! across tiers. Latency percentiles come from a bounded ring buffer per
//! tier, oldest samples evicted first; history is never unbounded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use serde::Serialize;

use crate::cache::tier::{TierKind, TierUsage};

/// Fixed-capacity ring of latency samples in nanoseconds.
#[derive(Debug)]
pub struct LatencyRing {
    samples: Vec<u64>,
    capacity: usize,
    next: usize,
    len: usize,
}

impl LatencyRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: vec![0; capacity],
            capacity,
            next: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, nanos: u64) {
        self.samples[self.next] = nanos;
        self.next = (self.next + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.next = 0;
        self.len = 0;
    }

    /// Average and p95 over the retained window.
    pub fn summarize(&self) -> (u64, u64) {
        if self.len == 0 {
            return (0, 0);
        }
        let mut window: Vec<u64> = self.samples[..self.len].to_vec();
        window.sort_unstable();
        let avg = window.iter().sum::<u64>() / window.len() as u64;
        let p95_rank = ((window.len() as f64) * 0.95).ceil() as usize;
        let p95 = window[p95_rank.saturating_sub(1).min(window.len() - 1)];
        (avg, p95)
    }
}

#[derive(Debug)]
struct TierCounters {
    hits: CachePadded<AtomicU64>,
    misses: CachePadded<AtomicU64>,
    latencies: Mutex<LatencyRing>,
}

impl TierCounters {
    fn new(sample_capacity: usize) -> Self {
        Self {
            hits: CachePadded::new(AtomicU64::new(0)),
            misses: CachePadded::new(AtomicU64::new(0)),
            latencies: Mutex::new(LatencyRing::new(sample_capacity)),
        }
    }
}

/// Point-in-time statistics for one tier.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TierStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub entries: usize,
    pub bytes: usize,
    pub avg_latency_ns: u64,
    pub p95_latency_ns: u64,
}

/// Per-tier statistics plus the aggregate view.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsSnapshot {
    pub tiers: [TierStatsSnapshot; 3],
    pub aggregate: TierStatsSnapshot,
}

impl StatsSnapshot {
    pub fn tier(&self, kind: TierKind) -> &TierStatsSnapshot {
        &self.tiers[kind.index()]
    }
}

/// Hit/miss/latency recorder injected into the coordinator at
/// construction; lifecycle is tied to the engine instance, never global.
#[derive(Debug)]
pub struct StatsRecorder {
    tiers: [TierCounters; 3],
}

impl StatsRecorder {
    pub fn new(sample_capacity: usize) -> Self {
        Self {
            tiers: [
                TierCounters::new(sample_capacity),
                TierCounters::new(sample_capacity),
                TierCounters::new(sample_capacity),
            ],
        }
    }

    pub fn record_hit(&self, tier: TierKind, latency: Duration) {
        let counters = &self.tiers[tier.index()];
        counters.hits.fetch_add(1, Ordering::Relaxed);
        self.push_latency(counters, latency);
    }

    pub fn record_miss(&self, tier: TierKind, latency: Duration) {
        let counters = &self.tiers[tier.index()];
        counters.misses.fetch_add(1, Ordering::Relaxed);
        self.push_latency(counters, latency);
    }

    fn push_latency(&self, counters: &TierCounters, latency: Duration) {
        let nanos = latency.as_nanos().min(u64::MAX as u128) as u64;
        let mut ring = counters
            .latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ring.push(nanos);
    }

    /// Snapshot counters together with live tier usage supplied by the
    /// coordinator (entries/bytes are owned by the stores, not here).
    pub fn snapshot(&self, usages: [TierUsage; 3]) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::default();
        let mut agg_hits = 0u64;
        let mut agg_misses = 0u64;
        let mut agg_lat_weighted = 0u128;
        let mut agg_p95_max = 0u64;

        for kind in TierKind::ALL {
            let counters = &self.tiers[kind.index()];
            let hits = counters.hits.load(Ordering::Relaxed);
            let misses = counters.misses.load(Ordering::Relaxed);
            let (avg, p95) = {
                let ring = counters
                    .latencies
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                ring.summarize()
            };
            let usage = usages[kind.index()];
            snapshot.tiers[kind.index()] = TierStatsSnapshot {
                hits,
                misses,
                hit_ratio: ratio(hits, misses),
                entries: usage.entries,
                bytes: usage.bytes,
                avg_latency_ns: avg,
                p95_latency_ns: p95,
            };
            agg_hits += hits;
            agg_misses += misses;
            agg_lat_weighted += (avg as u128) * ((hits + misses) as u128);
            agg_p95_max = agg_p95_max.max(p95);
        }

        let agg_ops = agg_hits + agg_misses;
        snapshot.aggregate = TierStatsSnapshot {
            hits: agg_hits,
            misses: agg_misses,
            hit_ratio: ratio(agg_hits, agg_misses),
            entries: usages.iter().map(|u| u.entries).sum(),
            bytes: usages.iter().map(|u| u.bytes).sum(),
            avg_latency_ns: if agg_ops > 0 {
                (agg_lat_weighted / agg_ops as u128) as u64
            } else {
                0
            },
            p95_latency_ns: agg_p95_max,
        };
        snapshot
    }

    /// Zero all counters and samples. Ring locks are held across the
    /// counter stores so a concurrent snapshot sees either the old epoch
    /// or the fully reset one.
    pub fn reset(&self) {
        let mut guards = Vec::with_capacity(3);
        for counters in &self.tiers {
            guards.push(
                counters
                    .latencies
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            );
        }
        for counters in &self.tiers {
            counters.hits.store(0, Ordering::Relaxed);
            counters.misses.store(0, Ordering::Relaxed);
        }
        for guard in &mut guards {
            guard.clear();
        }
    }
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
