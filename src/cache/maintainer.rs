//! Maintenance: cleanup, compaction, index rebuild and validation
//!
//! All maintenance runs concurrently with normal traffic over
//! non-blocking scans; entries changing mid-scan are tolerated. Batch
//! runs report per-operation results instead of failing on the first
//! error.

use std::collections::BTreeMap;

use log::warn;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::coordinator::Coordinator;
use crate::cache::error::CacheOperationError;
use crate::cache::index::ValidationReport;

/// The maintenance operations a batch run can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MaintenanceOp {
    Cleanup,
    Optimize,
    RebuildIndex,
    Validate,
}

impl MaintenanceOp {
    pub const ALL: [MaintenanceOp; 4] = [
        MaintenanceOp::Cleanup,
        MaintenanceOp::Optimize,
        MaintenanceOp::RebuildIndex,
        MaintenanceOp::Validate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MaintenanceOp::Cleanup => "cleanup",
            MaintenanceOp::Optimize => "optimize",
            MaintenanceOp::RebuildIndex => "rebuild_index",
            MaintenanceOp::Validate => "validate",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cleanup" => Some(MaintenanceOp::Cleanup),
            "optimize" => Some(MaintenanceOp::Optimize),
            "rebuild_index" => Some(MaintenanceOp::RebuildIndex),
            "validate" => Some(MaintenanceOp::Validate),
            _ => None,
        }
    }
}

/// Outcome of one maintenance operation.
#[derive(Debug, Clone, Serialize)]
pub enum MaintenanceReport {
    Cleanup {
        /// Expired entries removed plus index references dropped.
        removed: u64,
    },
    Optimize {
        /// Tiers whose compaction hook ran.
        tiers_optimized: usize,
    },
    RebuildIndex {
        /// Keys re-indexed from store scans.
        indexed: usize,
    },
    Validate {
        valid: bool,
        issues: Vec<String>,
    },
    /// The run stopped at a cancellation point before this operation.
    Skipped,
}

/// Periodic/triggered cleanup, integrity validation and index repair.
#[derive(Clone)]
pub struct Maintainer {
    coordinator: Coordinator,
}

impl Maintainer {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    /// Eagerly sweep expired entries from every tier and prune index
    /// buckets left empty. Returns how many entries were removed.
    pub async fn cleanup(&self) -> Result<u64, CacheOperationError> {
        let mut removed = 0u64;
        for store in self.coordinator.stores() {
            match store.purge_expired().await {
                Ok(count) => removed += count,
                Err(e) => warn!("cleanup: {} tier degraded: {e}", store.kind()),
            }
        }
        let stores = self.coordinator.stores();
        removed += self.coordinator.index().prune_missing(&stores).await?;
        self.coordinator.index().prune_empty();
        Ok(removed)
    }

    /// Run each tier's compaction hook. Tiers without a native concept
    /// treat this as a no-op.
    pub async fn optimize(&self) -> Result<usize, CacheOperationError> {
        let mut optimized = 0usize;
        for store in self.coordinator.stores() {
            match store.optimize().await {
                Ok(()) => optimized += 1,
                Err(e) => warn!("optimize: {} tier degraded: {e}", store.kind()),
            }
        }
        Ok(optimized)
    }

    /// Reconstruct the invalidation index from full store scans.
    pub async fn rebuild_index(&self) -> Result<usize, CacheOperationError> {
        let stores = self.coordinator.stores();
        self.coordinator.index().rebuild(&stores).await
    }

    /// Cross-check the index against tier contents. Diagnostic only;
    /// repairs go through `rebuild_index`.
    pub async fn validate(&self) -> Result<ValidationReport, CacheOperationError> {
        let stores = self.coordinator.stores();
        self.coordinator.index().validate(&stores).await
    }

    /// Run a batch of maintenance operations, reporting per-operation
    /// results. A drifted index surfaces as `ValidationDrift` carrying
    /// the issue count; operations after a cancellation point report
    /// `Skipped`.
    pub async fn maintenance(
        &self,
        ops: &[MaintenanceOp],
        cancel: &CancellationToken,
    ) -> BTreeMap<String, Result<MaintenanceReport, CacheOperationError>> {
        let selected: &[MaintenanceOp] = if ops.is_empty() {
            &MaintenanceOp::ALL
        } else {
            ops
        };

        let mut results = BTreeMap::new();
        for op in selected {
            if cancel.is_cancelled() {
                results.insert(op.name().to_string(), Ok(MaintenanceReport::Skipped));
                continue;
            }
            let report = match op {
                MaintenanceOp::Cleanup => self
                    .cleanup()
                    .await
                    .map(|removed| MaintenanceReport::Cleanup { removed }),
                MaintenanceOp::Optimize => self
                    .optimize()
                    .await
                    .map(|tiers_optimized| MaintenanceReport::Optimize { tiers_optimized }),
                MaintenanceOp::RebuildIndex => self
                    .rebuild_index()
                    .await
                    .map(|indexed| MaintenanceReport::RebuildIndex { indexed }),
                MaintenanceOp::Validate => self.validate().await.and_then(|report| {
                    if report.valid {
                        Ok(MaintenanceReport::Validate {
                            valid: true,
                            issues: report.issues,
                        })
                    } else {
                        for issue in &report.issues {
                            warn!("index validation: {issue}");
                        }
                        Err(CacheOperationError::ValidationDrift(report.issues.len()))
                    }
                }),
            };
            results.insert(op.name().to_string(), report);
        }
        results
    }
}
