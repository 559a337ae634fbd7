//! Integration tests for tenantscale-cache

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tenantscale_cache::local::glob_matches;
use tenantscale_cache::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DailyMetrics {
    tenant_id: String,
    appointments: u32,
    messages: Vec<String>,
}

fn metrics(tenant: &str) -> DailyMetrics {
    DailyMetrics {
        tenant_id: tenant.to_string(),
        appointments: 14,
        messages: (0..50).map(|i| format!("message {i}")).collect(),
    }
}

/// In-memory shared tier that can be switched off.
#[derive(Default)]
struct MemoryTier {
    data: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    down: AtomicBool,
}

impl MemoryTier {
    fn check(&self) -> CacheResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("connection refused".into()));
        }
        Ok(())
    }

    fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().get(key).map(|(value, _)| value.clone())
    }
}

#[async_trait]
impl SharedTier for MemoryTier {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.check()?;
        let mut data = self.data.lock();
        match data.get(key) {
            Some((value, expires)) if Instant::now() < *expires => Ok(Some(value.clone())),
            Some(_) => {
                data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.check()?;
        self.data
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        Ok(self.data.lock().remove(key).is_some())
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<u64> {
        self.check()?;
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|key, _| !glob_matches(pattern, key));
        Ok((before - data.len()) as u64)
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check()
    }

    async fn memory_usage(&self) -> CacheResult<Option<String>> {
        self.check()?;
        Ok(None)
    }

    async fn key_count(&self) -> CacheResult<u64> {
        self.check()?;
        Ok(self.data.lock().len() as u64)
    }
}

fn tiered(tier: &Arc<MemoryTier>) -> TieredCache {
    let config = CacheConfig::local().with_retry_after(Duration::ZERO);
    TieredCache::with_shared_tier(config, tier.clone())
}

#[tokio::test]
async fn test_ttl_round_trip() {
    let cache = TieredCache::local(CacheConfig::local());

    cache
        .set("tenant:1:daily", &metrics("t-1"), Some(Duration::from_millis(100)))
        .await;
    let hit: Option<DailyMetrics> = cache.get("tenant:1:daily").await;
    assert_eq!(hit, Some(metrics("t-1")));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let miss: Option<DailyMetrics> = cache.get("tenant:1:daily").await;
    assert_eq!(miss, None);
    assert_eq!(cache.local_len(), 0);
}

#[tokio::test]
async fn test_ttl_round_trip_through_shared_tier() {
    let tier = Arc::new(MemoryTier::default());
    let cache = tiered(&tier);

    cache
        .set("tenant:1:daily", &metrics("t-1"), Some(Duration::from_millis(100)))
        .await;
    assert_eq!(cache.get::<DailyMetrics>("tenant:1:daily").await, Some(metrics("t-1")));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(cache.get::<DailyMetrics>("tenant:1:daily").await, None);
}

#[tokio::test]
async fn test_unreachable_shared_tier_never_fails_caller() {
    let tier = Arc::new(MemoryTier::default());
    tier.down.store(true, Ordering::SeqCst);
    let cache = tiered(&tier);

    assert!(cache.set("tenant:2:daily", &metrics("t-2"), None).await);
    assert_eq!(cache.get::<DailyMetrics>("tenant:2:daily").await, Some(metrics("t-2")));
    assert!(cache.delete("tenant:2:daily").await);
    assert_eq!(cache.clear_all().await, 0);

    let health = cache.health_check().await;
    assert!(!health.shared);
    assert!(health.fallback);
    assert_eq!(health.latency_ms, None);
}

#[tokio::test]
async fn test_shared_tier_outage_mid_run() {
    let tier = Arc::new(MemoryTier::default());
    let cache = tiered(&tier);
    cache.set("tenant:3:daily", &metrics("t-3"), None).await;

    tier.down.store(true, Ordering::SeqCst);
    assert_eq!(cache.get::<DailyMetrics>("tenant:3:daily").await, Some(metrics("t-3")));

    tier.down.store(false, Ordering::SeqCst);
    let health = cache.health_check().await;
    assert!(health.shared);
    assert!(health.latency_ms.is_some());
}

#[tokio::test]
async fn test_clear_all_twice() {
    let tier = Arc::new(MemoryTier::default());
    let cache = tiered(&tier);
    for i in 0..5 {
        cache.set(&format!("tenant:{i}:daily"), &i, None).await;
    }

    assert_eq!(cache.clear_all().await, 10);
    assert_eq!(cache.clear_all().await, 0);
    assert_eq!(cache.local_len(), 0);
    assert_eq!(cache.get::<u32>("tenant:0:daily").await, None);
}

#[tokio::test]
async fn test_clear_all_keeps_foreign_keys() {
    let tier = Arc::new(MemoryTier::default());
    tier.data.lock().insert(
        "other-app:key".into(),
        (b"1".to_vec(), Instant::now() + Duration::from_secs(60)),
    );
    let cache = tiered(&tier);
    cache.set("tenant:1:daily", &1u32, None).await;

    cache.clear_all().await;

    assert!(tier.raw("other-app:key").is_some());
}

#[tokio::test]
async fn test_clear_pattern() {
    let tier = Arc::new(MemoryTier::default());
    let cache = tiered(&tier);
    cache.set("tenant:1:daily", &1u32, None).await;
    cache.set("tenant:1:weekly", &2u32, None).await;
    cache.set("tenant:2:daily", &3u32, None).await;

    let removed = cache.clear_pattern("tenant:1:*").await;

    assert_eq!(removed, 4);
    assert_eq!(cache.get::<u32>("tenant:1:daily").await, None);
    assert_eq!(cache.get::<u32>("tenant:1:weekly").await, None);
    assert_eq!(cache.get::<u32>("tenant:2:daily").await, Some(3));
}

#[tokio::test]
async fn test_clear_pattern_local_substring() {
    let cache = TieredCache::local(CacheConfig::local());
    cache.set("report:tenant:9", &1u32, None).await;
    cache.set("tenant:9", &2u32, None).await;
    cache.set("tenant:10", &3u32, None).await;

    assert_eq!(cache.clear_pattern("tenant:9").await, 2);
    assert_eq!(cache.get::<u32>("tenant:10").await, Some(3));
}

#[tokio::test]
async fn test_compressed_values() {
    let tier = Arc::new(MemoryTier::default());
    let cache = tiered(&tier);
    let value = metrics("t-4");

    cache
        .set_with_options("tenant:4:daily", &value, CacheOptions::default().compressed())
        .await;

    let raw = tier
        .raw(&format!("{DEFAULT_KEY_PREFIX}tenant:4:daily"))
        .unwrap();
    assert!(codec::is_gzip(&raw));
    assert_eq!(cache.get::<DailyMetrics>("tenant:4:daily").await, Some(value.clone()));

    tier.down.store(true, Ordering::SeqCst);
    assert_eq!(cache.get::<DailyMetrics>("tenant:4:daily").await, Some(value));
}

#[tokio::test]
async fn test_stats_and_hit_rate() {
    let cache = TieredCache::local(CacheConfig::local());
    cache.set("a", &1u32, None).await;

    cache.get::<u32>("a").await;
    cache.get::<u32>("a").await;
    cache.get::<u32>("a").await;
    cache.get::<u32>("b").await;

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.total_operations, 4);
    assert!((stats.hit_rate - 75.0).abs() < f64::EPSILON);
    assert_eq!(stats.local_entries, 1);
    assert!(!stats.shared_connected);
}

#[tokio::test]
async fn test_local_ceiling_sweeps_expired() {
    let cache = TieredCache::local(CacheConfig::local().with_local_max_entries(3));
    for i in 0..3 {
        cache
            .set(&format!("short:{i}"), &i, Some(Duration::from_millis(10)))
            .await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    cache.set("long", &1u32, None).await;

    assert_eq!(cache.local_len(), 1);
}

#[tokio::test]
async fn test_optimize_sweeps_expired() {
    let cache = TieredCache::local(CacheConfig::local());
    cache.set("a", &1u32, Some(Duration::from_millis(10))).await;
    cache.set("b", &2u32, None).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(cache.optimize().await, 1);
    assert_eq!(cache.local_len(), 1);
}

#[tokio::test]
async fn test_clones_share_state() {
    let cache = TieredCache::local(CacheConfig::local());
    let other = cache.clone();

    cache.set("a", &1u32, None).await;

    assert_eq!(other.get::<u32>("a").await, Some(1));
    assert_eq!(cache.stats().await.hits, 1);
}

#[tokio::test]
async fn test_local_only_without_url() {
    let cache = TieredCache::new(CacheConfig::local()).unwrap();
    assert!(!cache.has_shared_tier());
}

#[test]
fn test_cache_error_display() {
    let err = CacheError::Connection("Failed to connect".to_string());
    assert!(err.to_string().contains("Failed to connect"));
    assert!(err.is_unavailable());
}

// Note: These tests require a Redis server on localhost:6379.
// Run with: cargo test -- --ignored

#[tokio::test]
#[ignore]
async fn test_redis_round_trip() {
    let cache = TieredCache::new(
        CacheConfig::redis("redis://localhost:6379").with_key_prefix("tenantscale:test:"),
    )
    .unwrap();

    cache.set("tenant:1", &metrics("t-1"), Some(Duration::from_secs(5))).await;
    assert_eq!(cache.get::<DailyMetrics>("tenant:1").await, Some(metrics("t-1")));

    let health = cache.health_check().await;
    assert!(health.shared);

    let stats = cache.stats().await;
    assert!(stats.shared_connected);
    assert!(stats.memory_usage.is_some());

    cache.clear_all().await;
    cache.close().await;
}

#[tokio::test]
#[ignore]
async fn test_redis_clear_pattern_scans() {
    let cache = TieredCache::new(
        CacheConfig::redis("redis://localhost:6379").with_key_prefix("tenantscale:scan:"),
    )
    .unwrap();

    for i in 0..500 {
        cache.set(&format!("tenant:{i}"), &i, None).await;
    }

    assert!(cache.clear_pattern("tenant:*").await >= 500);
    assert_eq!(cache.get::<u32>("tenant:7").await, None);
    cache.close().await;
}
