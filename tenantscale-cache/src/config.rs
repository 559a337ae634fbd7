//! Cache configuration types.

use std::time::Duration;

/// Prefix applied to every key in both tiers.
pub const DEFAULT_KEY_PREFIX: &str = "tenantscale:metrics:";

/// Cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Shared tier URL. `None` runs the cache local-only.
    pub redis_url: Option<String>,

    /// Key prefix for all cache keys
    pub key_prefix: String,

    /// TTL used when a call does not give one
    pub default_ttl: Duration,

    /// Timeout for establishing the shared connection
    pub connection_timeout: Duration,

    /// Timeout for a single shared-tier command
    pub command_timeout: Duration,

    /// How long the shared tier is skipped after an error
    pub retry_after: Duration,

    /// Local entry count above which expired entries are swept
    pub local_max_entries: usize,

    /// Interval of the stats reporter
    pub stats_interval: Duration,

    /// Operation count above which the reporter resets the counters
    pub stats_reset_threshold: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl: Duration::from_secs(15 * 60),
            connection_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            retry_after: Duration::from_secs(5),
            local_max_entries: 10_000,
            stats_interval: Duration::from_secs(5 * 60),
            stats_reset_threshold: 1_000_000,
        }
    }
}

impl CacheConfig {
    /// Local-only configuration.
    pub fn local() -> Self {
        Self::default()
    }

    /// Configuration with a Redis shared tier.
    ///
    /// # Examples
    ///
    /// ```
    /// use tenantscale_cache::CacheConfig;
    ///
    /// let config = CacheConfig::redis("redis://localhost:6379");
    /// assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
    /// ```
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            redis_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// `REDIS_URL` wins; otherwise `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`
    /// and `REDIS_DB` are assembled into a URL. With neither the cache runs
    /// local-only.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<L>(lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let redis_url = non_empty("REDIS_URL").or_else(|| {
            let host = non_empty("REDIS_HOST")?;
            let port = non_empty("REDIS_PORT")
                .and_then(|p| p.trim().parse::<u16>().ok())
                .unwrap_or(6379);
            let db = non_empty("REDIS_DB")
                .and_then(|d| d.trim().parse::<u8>().ok())
                .unwrap_or(0);
            let auth = non_empty("REDIS_PASSWORD")
                .map(|password| format!(":{password}@"))
                .unwrap_or_default();
            Some(format!("redis://{auth}{}:{port}/{db}", host.trim()))
        });

        Self {
            redis_url,
            ..Default::default()
        }
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set how long the shared tier is skipped after an error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Set the local sweep threshold.
    pub fn with_local_max_entries(mut self, max: usize) -> Self {
        self.local_max_entries = max;
        self
    }

    /// Set the stats reporter interval.
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Build the final key with the prefix.
    pub fn build_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}
