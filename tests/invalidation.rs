//! Invalidation, warming and maintenance behavior: tags, namespaces,
//! patterns, cancellation, index drift and repair.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stratacache::{
    CacheConfig, Coordinator, MaintenanceOp, MaintenanceReport, PutOptions, StrataCache, TierKind,
    TierStore, WarmEntry,
};
use tokio_util::sync::CancellationToken;

fn engine() -> StrataCache {
    StrataCache::builder().build()
}

async fn put_tagged(cache: &StrataCache, key: &str, tag: &str, ns: &str) {
    let options = PutOptions::tagged([tag]).with_namespace(ns);
    cache
        .put(key, key.as_bytes().to_vec(), None, options)
        .await
        .unwrap();
}

#[tokio::test]
async fn tag_invalidation_removes_from_every_tier() {
    let cache = engine();
    put_tagged(&cache, "ip:192.0.2.1:v1", "ip_reputation", "ip").await;
    put_tagged(&cache, "ip:192.0.2.2:v1", "ip_reputation", "ip").await;
    put_tagged(&cache, "geo:10.0.0.1:v1", "geolocation", "geo").await;

    assert_eq!(cache.invalidate_by_tag("ip_reputation").await.unwrap(), 2);

    assert_eq!(cache.get("ip:192.0.2.1:v1").await.unwrap(), None);
    assert_eq!(cache.get("ip:192.0.2.2:v1").await.unwrap(), None);
    assert!(cache.get("geo:10.0.0.1:v1").await.unwrap().is_some());

    // Direct tier reads confirm full removal, not just coordinator masking.
    for kind in [TierKind::Fast, TierKind::Persistent] {
        assert!(cache
            .tier_store(kind)
            .get("ip:192.0.2.1:v1")
            .await
            .unwrap()
            .is_none());
    }
}

#[tokio::test]
async fn reputation_scenario_end_to_end() {
    let cache = engine();
    cache
        .put(
            "ip:192.0.2.1:v1",
            b"reputation-blob".to_vec(),
            Some(Duration::from_secs(30 * 60)),
            PutOptions::tagged(["ip_reputation"]),
        )
        .await
        .unwrap();

    assert_eq!(
        cache.get("ip:192.0.2.1:v1").await.unwrap(),
        Some(b"reputation-blob".to_vec())
    );

    assert_eq!(cache.invalidate_by_tag("ip_reputation").await.unwrap(), 1);
    assert_eq!(cache.get("ip:192.0.2.1:v1").await.unwrap(), None);
}

#[tokio::test]
async fn namespace_invalidation_scopes_to_domain() {
    let cache = engine();
    put_tagged(&cache, "spam:pattern:1:v1", "patterns", "spam").await;
    put_tagged(&cache, "spam:pattern:2:v1", "patterns", "spam").await;
    put_tagged(&cache, "ham:pattern:1:v1", "patterns", "ham").await;

    assert_eq!(cache.invalidate_by_namespace("spam").await.unwrap(), 2);
    assert_eq!(cache.get("spam:pattern:1:v1").await.unwrap(), None);
    assert!(cache.get("ham:pattern:1:v1").await.unwrap().is_some());
}

#[tokio::test]
async fn pattern_invalidation_matches_globs() {
    let cache = engine();
    for key in ["user:1:v1", "user:2:v1", "user:2:v2", "acct:1:v1"] {
        cache
            .put(key, b"v".to_vec(), None, PutOptions::default())
            .await
            .unwrap();
    }

    assert_eq!(cache.invalidate_by_pattern("user:*:v1").await.unwrap(), 2);
    assert_eq!(cache.get("user:1:v1").await.unwrap(), None);
    assert!(cache.get("user:2:v2").await.unwrap().is_some());
    assert!(cache.get("acct:1:v1").await.unwrap().is_some());
}

#[tokio::test]
async fn pattern_invalidation_reaches_untagged_keys() {
    let cache = engine();
    // No tags or namespace recorded: only store scans can find these.
    cache
        .put("session:abc", b"1".to_vec(), None, PutOptions::default())
        .await
        .unwrap();
    cache
        .put("session:def", b"2".to_vec(), None, PutOptions::default())
        .await
        .unwrap();

    assert_eq!(cache.invalidate_by_pattern("session:*").await.unwrap(), 2);
    assert_eq!(cache.get("session:abc").await.unwrap(), None);
}

#[tokio::test]
async fn cancelled_invalidation_reports_partial_progress() {
    let mut config = CacheConfig::default();
    config.invalidation_batch = 1;
    let coordinator = Coordinator::new(config);

    for i in 0..10 {
        coordinator
            .put(
                &format!("bulk:{i}"),
                vec![i as u8],
                None,
                &PutOptions::tagged(["bulk"]),
            )
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = coordinator
        .invalidate_by_tag("bulk", &cancel)
        .await
        .unwrap();
    assert!(!outcome.completed);
    assert_eq!(outcome.removed, 0);

    // Re-running after the interruption is idempotent and finishes.
    let outcome = coordinator
        .invalidate_by_tag("bulk", &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.completed);
    assert_eq!(outcome.removed, 10);
}

#[tokio::test]
async fn invalidation_hook_observes_each_key() {
    let cache = engine();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        cache.on_invalidate(move |key| {
            seen.lock().unwrap().push(key.to_string());
        });
    }

    put_tagged(&cache, "obs:1:v1:x", "watched", "obs").await;
    cache.invalidate_by_tag("watched").await.unwrap();

    let keys = seen.lock().unwrap().clone();
    assert!(keys.contains(&"obs:1:v1:x".to_string()));
}

#[tokio::test]
async fn flush_single_tier_keeps_other_tiers_serving() {
    let cache = engine();
    put_tagged(&cache, "flush:1", "t", "ns").await;

    assert!(cache.flush(Some(TierKind::Fast)).await.unwrap());
    assert!(cache
        .tier_store(TierKind::Fast)
        .get("flush:1")
        .await
        .unwrap()
        .is_none());
    // Persistent copy still serves (and re-backfills fast).
    assert!(cache.get("flush:1").await.unwrap().is_some());
}

#[tokio::test]
async fn flush_all_clears_everything_and_index() {
    let cache = engine();
    put_tagged(&cache, "flush:all:1", "t", "ns").await;

    assert!(cache.flush(None).await.unwrap());
    assert_eq!(cache.get("flush:all:1").await.unwrap(), None);
    assert_eq!(cache.invalidate_by_tag("t").await.unwrap(), 0);
}

#[tokio::test]
async fn validate_detects_drift_and_rebuild_repairs_it() {
    let cache = engine();
    put_tagged(&cache, "drift:1", "drifted", "ns").await;

    // Remove from the stores behind the coordinator's back.
    for kind in TierKind::ALL {
        let _ = cache.tier_store(kind).delete("drift:1").await;
    }

    let results = cache.maintenance(&[MaintenanceOp::Validate]).await;
    match results.get("validate").unwrap() {
        Err(stratacache::CacheOperationError::ValidationDrift(issues)) => {
            assert!(*issues >= 1);
        }
        other => panic!("expected drift, got {other:?}"),
    }

    let results = cache.maintenance(&[MaintenanceOp::RebuildIndex]).await;
    assert!(matches!(
        results.get("rebuild_index").unwrap().as_ref().unwrap(),
        MaintenanceReport::RebuildIndex { .. }
    ));

    let results = cache.maintenance(&[MaintenanceOp::Validate]).await;
    match results.get("validate").unwrap().as_ref().unwrap() {
        MaintenanceReport::Validate { valid, .. } => assert!(*valid),
        other => panic!("unexpected report {other:?}"),
    }
}

#[tokio::test]
async fn cleanup_sweeps_expired_entries() {
    let cache = engine();
    cache
        .put(
            "sweep:1",
            b"x".to_vec(),
            Some(Duration::from_millis(10)),
            PutOptions::default(),
        )
        .await
        .unwrap();
    cache
        .put("sweep:2", b"y".to_vec(), None, PutOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let results = cache.maintenance(&[MaintenanceOp::Cleanup]).await;
    match results.get("cleanup").unwrap().as_ref().unwrap() {
        MaintenanceReport::Cleanup { removed } => {
            // Expired in fast and persistent tiers at minimum.
            assert!(*removed >= 2, "removed = {removed}");
        }
        other => panic!("unexpected report {other:?}"),
    }
    assert!(cache.get("sweep:2").await.unwrap().is_some());
}

#[tokio::test]
async fn maintenance_batch_reports_per_operation() {
    let cache = engine();
    let results = cache.maintenance(&[]).await;
    assert_eq!(results.len(), MaintenanceOp::ALL.len());
    for op in MaintenanceOp::ALL {
        assert!(results.contains_key(op.name()), "missing {}", op.name());
    }
}

#[tokio::test]
async fn warm_tasks_report_per_task_outcomes() {
    let cache = engine();
    let produced = Arc::new(AtomicUsize::new(0));

    {
        let produced = produced.clone();
        cache.register_warm_task("geo_seed", move || {
            produced.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(vec![
                    WarmEntry::new("geo:city:1:v1", b"sf".to_vec())
                        .with_ttl(Duration::from_secs(600))
                        .with_tags(["geolocation"]),
                    WarmEntry::new("geo:city:2:v1", b"nyc".to_vec())
                        .with_tags(["geolocation"]),
                ])
            }
        });
    }
    cache.register_warm_task("broken_seed", || async {
        Err(stratacache::CacheOperationError::loader("feed offline"))
    });

    let results = cache.warm(&[]).await;
    assert_eq!(results.len(), 2);

    let geo = &results["geo_seed"];
    assert_eq!(geo.loaded, 2);
    assert!(geo.error.is_none());
    let broken = &results["broken_seed"];
    assert!(broken.error.as_deref().unwrap().contains("feed offline"));

    // One task failing never blocks the others' entries.
    assert!(cache.get("geo:city:1:v1").await.unwrap().is_some());
    assert_eq!(produced.load(Ordering::SeqCst), 1);

    // Warmed entries are tagged for later invalidation.
    assert_eq!(cache.invalidate_by_tag("geolocation").await.unwrap(), 2);
}

#[tokio::test]
async fn warm_unknown_task_reports_error() {
    let cache = engine();
    let results = cache.warm(&["missing".to_string()]).await;
    assert!(results["missing"].error.as_deref().unwrap().contains("unknown"));
}

#[tokio::test]
async fn toggled_off_then_on_tier_does_not_resurrect_forgotten_keys() {
    let cache = engine();
    put_tagged(&cache, "resur:1", "t", "ns").await;

    cache.toggle_tier(TierKind::Persistent, false);
    assert!(cache.forget("resur:1").await.unwrap());
    cache.toggle_tier(TierKind::Persistent, true);

    // forget removed from disabled tiers too.
    assert_eq!(cache.get("resur:1").await.unwrap(), None);
}

#[tokio::test]
async fn update_config_applies_tier_patch() {
    let cache = engine();
    let patch = stratacache::ConfigPatch {
        tiers: vec![stratacache::TierPatch::enable(TierKind::Fast, false)],
        remember_wait: Some(Duration::from_millis(100)),
        invalidation_batch: Some(16),
    };
    assert!(cache.update_config(&patch));

    let config = cache.config();
    assert!(!config.tier(TierKind::Fast).enabled);
    assert_eq!(config.remember_wait, Duration::from_millis(100));
    assert_eq!(config.invalidation_batch, 16);
}

#[tokio::test]
async fn config_round_trips_through_the_builder() {
    let cache = StrataCache::builder()
        .latency_sample_capacity(64)
        .invalidation_batch(32)
        .build();

    let config = cache.config();
    assert_eq!(config.latency_sample_capacity, 64);
    assert_eq!(config.invalidation_batch, 32);

    // Rebuilding from a read-back config preserves the capacity.
    let rebuilt = StrataCache::builder().config(config).build();
    assert_eq!(rebuilt.config().latency_sample_capacity, 64);
}
