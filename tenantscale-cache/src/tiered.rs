//! Two-tier cache: shared tier first, local fallback always.

use crate::codec;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::local::{LocalTier, glob_to_regex};
use crate::stats::{CacheCounters, CacheHealth, CacheStats};
use crate::tier::SharedTier;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Per-call write options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Expiry; `None` uses the configured default TTL.
    pub ttl: Option<Duration>,
    /// Gzip the serialized value.
    pub compress: bool,
}

impl CacheOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }
}

struct CacheInner {
    config: CacheConfig,
    shared: Option<Arc<dyn SharedTier>>,
    local: LocalTier,
    counters: CacheCounters,
    /// Shared tier is skipped until this instant after an error.
    shared_down_until: Mutex<Option<Instant>>,
    /// Keys written or deleted locally while the shared tier was unusable.
    /// Their shared copies are dropped before the tier is used again.
    stale_shared: Mutex<HashSet<String>>,
    reporter: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        if let Some(handle) = self.reporter.get_mut().take() {
            handle.abort();
        }
    }
}

/// Cache with a shared tier (usually Redis) in front of an in-process map.
///
/// Shared-tier errors are logged and absorbed: every read and write also goes
/// through the local tier, so the worst case for a caller is a miss. After an
/// error the shared tier is skipped for [`CacheConfig::retry_after`].
/// Keys set or deleted during that window are removed from the shared tier
/// once it is reachable again, so a recovered tier never serves a value
/// older than the local one.
///
/// Cloning is cheap and clones share both tiers and the counters.
///
/// # Examples
///
/// ```
/// use tenantscale_cache::*;
/// use std::time::Duration;
///
/// # async fn example() {
/// let cache = TieredCache::local(CacheConfig::local());
///
/// cache.set("tenant:42:daily", &vec![1, 2, 3], Some(Duration::from_secs(60))).await;
/// let value: Option<Vec<u32>> = cache.get("tenant:42:daily").await;
/// assert_eq!(value, Some(vec![1, 2, 3]));
/// # }
/// ```
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<CacheInner>,
}

impl TieredCache {
    /// Create a cache from configuration.
    ///
    /// With a Redis URL a [`crate::RedisTier`] is used as the shared tier;
    /// otherwise the cache is local-only.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        match connect_shared(&config)? {
            Some(shared) => Ok(Self::with_shared_tier(config, shared)),
            None => {
                info!("No shared cache configured, running local-only");
                Ok(Self::local(config))
            }
        }
    }

    /// Create a local-only cache.
    pub fn local(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a cache over an arbitrary shared tier.
    pub fn with_shared_tier(config: CacheConfig, shared: Arc<dyn SharedTier>) -> Self {
        Self::build(config, Some(shared))
    }

    fn build(config: CacheConfig, shared: Option<Arc<dyn SharedTier>>) -> Self {
        let cache = Self {
            inner: Arc::new(CacheInner {
                config,
                shared,
                local: LocalTier::new(),
                counters: CacheCounters::default(),
                shared_down_until: Mutex::new(None),
                stale_shared: Mutex::new(HashSet::new()),
                reporter: Mutex::new(None),
            }),
        };
        cache.start_reporter();
        cache
    }

    /// Get the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Whether a shared tier is configured (reachable or not).
    pub fn has_shared_tier(&self) -> bool {
        self.inner.shared.is_some()
    }

    /// Number of entries in the local tier, expired ones included.
    pub fn local_len(&self) -> usize {
        self.inner.local.len()
    }

    /// Get a value. Returns `None` on a miss, an expired entry or any error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.inner.config.build_key(key);

        if let Some(shared) = self.shared_tier()
            && self.purge_stale(shared).await
        {
            match shared.get(&full_key).await {
                Ok(Some(bytes)) => match codec::decode(&bytes) {
                    Ok(value) => {
                        self.inner.counters.record_hit();
                        debug!(key = %full_key, tier = "shared", "Cache hit");
                        return Some(value);
                    }
                    Err(e) => {
                        warn!(key = %full_key, error = %e, "Undecodable shared cache entry");
                    }
                },
                Ok(None) => {}
                Err(e) => self.shared_failed("get", &full_key, &e),
            }
        }

        if let Some(bytes) = self.inner.local.get(&full_key) {
            match codec::decode(&bytes) {
                Ok(value) => {
                    self.inner.counters.record_hit();
                    debug!(key = %full_key, tier = "local", "Cache hit");
                    return Some(value);
                }
                Err(e) => {
                    warn!(key = %full_key, error = %e, "Undecodable local cache entry");
                }
            }
        }

        self.inner.counters.record_miss();
        debug!(key = %full_key, "Cache miss");
        None
    }

    /// Store a value. `None` uses the configured default TTL.
    ///
    /// Returns `false` only if the value could not be serialized.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        self.set_with_options(key, value, CacheOptions { ttl, compress: false })
            .await
    }

    /// Store a value with explicit options.
    ///
    /// While the shared tier is skipped the value only reaches the local
    /// tier and the key is queued for removal from the shared tier.
    pub async fn set_with_options<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: CacheOptions,
    ) -> bool {
        let full_key = self.inner.config.build_key(key);
        let ttl = options.ttl.unwrap_or(self.inner.config.default_ttl);

        let bytes = match codec::encode(value, options.compress) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Failed to encode cache value");
                return false;
            }
        };

        if let Some(shared) = self.shared_tier()
            && self.purge_stale(shared).await
        {
            if let Err(e) = shared.set(&full_key, bytes.clone(), ttl).await {
                self.shared_failed("set", &full_key, &e);
                self.mark_stale(&full_key);
            }
        } else if self.has_shared_tier() {
            self.mark_stale(&full_key);
        }

        let entries = self
            .inner
            .local
            .set(&full_key, bytes, ttl, options.compress);
        if entries > self.inner.config.local_max_entries {
            self.inner
                .local
                .enforce_limit(self.inner.config.local_max_entries);
        }

        debug!(
            key = %full_key,
            ttl_ms = ttl.as_millis() as u64,
            compressed = options.compress,
            "Cache set"
        );
        true
    }

    /// Delete a key from both tiers. Returns whether either tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        let full_key = self.inner.config.build_key(key);
        let mut existed = false;

        if let Some(shared) = self.shared_tier()
            && self.purge_stale(shared).await
        {
            match shared.delete(&full_key).await {
                Ok(removed) => existed |= removed,
                Err(e) => {
                    self.shared_failed("delete", &full_key, &e);
                    self.mark_stale(&full_key);
                }
            }
        } else if self.has_shared_tier() {
            self.mark_stale(&full_key);
        }

        existed |= self.inner.local.remove(&full_key);
        existed
    }

    /// Delete every key matching a glob (`*`, `?`), relative to the prefix.
    ///
    /// Local keys containing `pattern` as literal text are removed too.
    /// Returns the number of entries removed across both tiers.
    pub async fn clear_pattern(&self, pattern: &str) -> u64 {
        let full_pattern = self.inner.config.build_key(pattern);
        let mut removed = 0;

        if let Some(shared) = self.shared_tier() {
            match shared.delete_matching(&full_pattern).await {
                Ok(count) => removed += count,
                Err(e) => self.shared_failed("clear_pattern", &full_pattern, &e),
            }
        }

        match glob_to_regex(&full_pattern) {
            Ok(glob) => removed += self.inner.local.remove_matching(&glob, pattern) as u64,
            Err(e) => warn!(pattern = %full_pattern, error = %e, "Skipping local pattern clear"),
        }

        info!(pattern = %full_pattern, removed, "Cache pattern cleared");
        removed
    }

    /// Delete every key under the prefix in both tiers.
    pub async fn clear_all(&self) -> u64 {
        let prefix = self.inner.config.key_prefix.clone();
        let mut removed = 0;

        if let Some(shared) = self.shared_tier() {
            let pattern = format!("{prefix}*");
            match shared.delete_matching(&pattern).await {
                Ok(count) => removed += count,
                Err(e) => self.shared_failed("clear_all", &pattern, &e),
            }
        }

        removed += self.inner.local.remove_prefix(&prefix) as u64;
        info!(removed, "Cache cleared");
        removed
    }

    /// Counter snapshot, enriched with shared tier figures when reachable.
    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.inner.counters.snapshot();
        stats.local_entries = self.inner.local.len();
        stats.key_count = stats.local_entries as u64;

        if let Some(shared) = self.shared_tier() {
            match tokio::try_join!(shared.memory_usage(), shared.key_count()) {
                Ok((memory_usage, key_count)) => {
                    stats.memory_usage = memory_usage;
                    stats.key_count = key_count;
                    stats.shared_connected = true;
                }
                Err(e) => self.shared_failed("stats", "", &e),
            }
        }

        stats
    }

    /// Ping the shared tier and time the round trip.
    ///
    /// Pings even while the tier is being skipped, and clears the skip on
    /// success.
    pub async fn health_check(&self) -> CacheHealth {
        let Some(shared) = self.inner.shared.as_ref() else {
            return CacheHealth {
                shared: false,
                fallback: true,
                latency_ms: None,
            };
        };

        let start = Instant::now();
        match shared.ping().await {
            Ok(()) => {
                *self.inner.shared_down_until.lock() = None;
                CacheHealth {
                    shared: true,
                    fallback: true,
                    latency_ms: Some(start.elapsed().as_millis() as u64),
                }
            }
            Err(e) => {
                self.shared_failed("ping", "", &e);
                CacheHealth {
                    shared: false,
                    fallback: true,
                    latency_ms: None,
                }
            }
        }
    }

    /// Sweep expired local entries and log tier state. Returns the number swept.
    pub async fn optimize(&self) -> usize {
        let cleaned = self.inner.local.cleanup_expired();
        let stats = self.stats().await;

        info!(
            cleaned,
            local_entries = stats.local_entries,
            compressed_entries = self.inner.local.compressed_len(),
            shared_connected = stats.shared_connected,
            memory_usage = stats.memory_usage.as_deref().unwrap_or("unknown"),
            "Cache optimization completed"
        );
        cleaned
    }

    /// Stop the reporter, drop the shared connection and clear the local tier.
    pub async fn close(&self) {
        if let Some(handle) = self.inner.reporter.lock().take() {
            handle.abort();
        }
        if let Some(shared) = self.inner.shared.as_ref() {
            shared.close().await;
        }
        self.inner.local.clear();
        self.inner.stale_shared.lock().clear();
        info!("Cache closed");
    }

    /// Whether the stats reporter is running.
    pub fn is_reporting(&self) -> bool {
        self.inner
            .reporter
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn shared_tier(&self) -> Option<&Arc<dyn SharedTier>> {
        let shared = self.inner.shared.as_ref()?;
        let mut down_until = self.inner.shared_down_until.lock();
        match *down_until {
            Some(until) if Instant::now() < until => None,
            Some(_) => {
                *down_until = None;
                Some(shared)
            }
            None => Some(shared),
        }
    }

    fn mark_stale(&self, full_key: &str) {
        self.inner.stale_shared.lock().insert(full_key.to_string());
    }

    /// Delete shared copies of stale keys. Returns `false` if the tier failed,
    /// in which case the remaining keys stay queued.
    async fn purge_stale(&self, shared: &Arc<dyn SharedTier>) -> bool {
        let stale: Vec<String> = self.inner.stale_shared.lock().drain().collect();
        if stale.is_empty() {
            return true;
        }

        for (done, key) in stale.iter().enumerate() {
            if let Err(e) = shared.delete(key).await {
                self.inner
                    .stale_shared
                    .lock()
                    .extend(stale[done..].iter().cloned());
                self.shared_failed("purge", key, &e);
                return false;
            }
        }

        debug!(count = stale.len(), "Dropped stale shared cache entries");
        true
    }

    fn shared_failed(&self, operation: &str, key: &str, error: &CacheError) {
        warn!(
            operation,
            key,
            error = %error,
            unavailable = error.is_unavailable(),
            "Shared cache tier error, using local fallback"
        );
        *self.inner.shared_down_until.lock() = Some(Instant::now() + self.inner.config.retry_after);
    }

    async fn report(&self) {
        let stats = self.stats().await;
        let health = self.health_check().await;

        info!(
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = stats.hit_rate,
            local_entries = stats.local_entries,
            key_count = stats.key_count,
            shared = health.shared,
            latency_ms = ?health.latency_ms,
            "Cache stats"
        );

        if stats.total_operations > self.inner.config.stats_reset_threshold {
            self.inner.counters.reset();
            info!(
                total_operations = stats.total_operations,
                "Cache counters reset"
            );
        }
    }

    fn start_reporter(&self) {
        let interval = self.inner.config.stats_interval;
        if interval.is_zero() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No tokio runtime available, cache stats reporter disabled");
            return;
        };

        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                TieredCache { inner }.report().await;
            }
        });

        *self.inner.reporter.lock() = Some(handle);
    }
}

#[cfg(feature = "redis")]
fn connect_shared(config: &CacheConfig) -> CacheResult<Option<Arc<dyn SharedTier>>> {
    let Some(url) = config.redis_url.as_deref() else {
        return Ok(None);
    };
    debug!(url = %redact(url), "Using Redis shared cache tier");
    let tier = crate::redis_tier::RedisTier::new(config)?;
    Ok(Some(Arc::new(tier)))
}

#[cfg(not(feature = "redis"))]
fn connect_shared(config: &CacheConfig) -> CacheResult<Option<Arc<dyn SharedTier>>> {
    if let Some(url) = config.redis_url.as_deref() {
        warn!(url = %redact(url), "Redis support not compiled in, running local-only");
    }
    Ok(None)
}

/// Hide the password part of a connection URL.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***{}", &url[..scheme], &url[at..])
        }
        _ => url.to_string(),
    }
}
