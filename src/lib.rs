//! stratacache - Multi-level cache coordination engine
//!
//! Serves reads and writes across three ordered cache tiers (ephemeral
//! per-operation, shared fast memory, persistent) with backfill on deep
//! hits, tag/namespace/pattern invalidation, TTL management, warming and
//! per-tier statistics.
//!
//! # Features
//!
//! - **Ordered tiers**: Ephemeral -> Fast -> Persistent probe order with
//!   automatic backfill of faster tiers on a hit below them
//! - **Graceful degradation**: a failing tier is skipped and logged;
//!   operations only fail when every enabled tier is down
//! - **Thundering-herd suppression**: `remember` runs a loader exactly
//!   once per key across concurrent callers
//! - **Bulk invalidation**: tags, namespaces and glob patterns resolved
//!   through an incrementally-maintained reverse index
//! - **Warming and maintenance**: named preload tasks, expired-entry
//!   sweeps, index validation and rebuild
//! - **Telemetry**: padded atomic hit/miss counters and bounded latency
//!   sampling per tier
//!
//! # Example
//!
//! ```no_run
//! use stratacache::{PutOptions, StrataCache};
//!
//! # async fn demo() -> Result<(), stratacache::CacheOperationError> {
//! let cache = StrataCache::builder().build();
//! cache.begin_scope();
//! cache
//!     .put(
//!         "ip:192.0.2.1:v1",
//!         b"reputation".to_vec(),
//!         Some(std::time::Duration::from_secs(1800)),
//!         PutOptions::tagged(["ip_reputation"]),
//!     )
//!     .await?;
//! let hit = cache.get("ip:192.0.2.1:v1").await?;
//! assert!(hit.is_some());
//! cache.invalidate_by_tag("ip_reputation").await?;
//! cache.end_scope();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod stratacache;
pub(crate) mod telemetry;

pub use crate::stratacache::{StrataCache, StrataCacheBuilder};

pub use cache::config::{CacheConfig, ConfigPatch, TierConfig, TierPatch};
pub use cache::coordinator::{Coordinator, InvalidationOutcome, PutOptions};
pub use cache::entry::CacheEntry;
pub use cache::error::CacheOperationError;
pub use cache::index::ValidationReport;
pub use cache::key::{CacheKey, KeyCodec};
pub use cache::maintainer::{MaintenanceOp, MaintenanceReport, Maintainer};
pub use cache::tier::{
    EphemeralStore, FastStore, KvBackend, MemoryBackend, PersistentStore, TierKind, TierStore,
    TierUsage,
};
pub use cache::warmer::{WarmEntry, WarmOutcome, Warmer};
pub use telemetry::{StatsSnapshot, TierStatsSnapshot};

pub use tokio_util::sync::CancellationToken;
