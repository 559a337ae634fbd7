//! Pool configuration.

use crate::{PoolError, PoolResult};
use std::fmt;
use std::time::Duration;

/// Connections created eagerly by `initialize` never exceed this.
pub const INITIAL_CONNECTION_CAP: usize = 10;

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Floor the reaper never shrinks below and the health monitor refills to.
    pub min_connections: usize,
    /// Hard cap on live connections.
    pub max_connections: usize,
    /// How long `acquire` waits in the queue.
    pub acquire_timeout: Duration,
    /// Idle time after which a connection may be reaped.
    pub idle_timeout: Duration,
    /// Reaper interval.
    pub reap_interval: Duration,
    /// Pause between failed replacement attempts.
    pub create_retry_interval: Duration,
    /// Upper bound on a single factory create.
    pub create_timeout: Duration,
    /// Upper bound on a single factory destroy.
    pub destroy_timeout: Duration,
    /// Health monitor interval.
    pub health_check_interval: Duration,
    /// Probe latency above which the pool reports unhealthy.
    pub probe_latency_threshold: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 5,
            max_connections: 50,
            acquire_timeout: Duration::from_millis(30_000),
            idle_timeout: Duration::from_millis(300_000),
            reap_interval: Duration::from_millis(10_000),
            create_retry_interval: Duration::from_millis(1_000),
            create_timeout: Duration::from_millis(10_000),
            destroy_timeout: Duration::from_millis(5_000),
            health_check_interval: Duration::from_secs(30),
            probe_latency_threshold: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with explicit bounds.
    pub fn new(min_connections: usize, max_connections: usize) -> Self {
        Self {
            min_connections,
            max_connections,
            ..Default::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Uses the following environment variables:
    /// - `TENANTSCALE_POOL_MIN`: Minimum connections (default: 5)
    /// - `TENANTSCALE_POOL_MAX`: Maximum connections (default: 50)
    /// - `TENANTSCALE_POOL_ACQUIRE_TIMEOUT_MS`: Acquire timeout in milliseconds
    /// - `TENANTSCALE_POOL_IDLE_TIMEOUT_MS`: Idle timeout in milliseconds
    /// - `TENANTSCALE_POOL_REAP_INTERVAL_MS`: Reaper interval in milliseconds
    pub fn from_env() -> PoolResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<L>(lookup: L) -> PoolResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = parse_var::<usize, _>(&lookup, "TENANTSCALE_POOL_MIN")? {
            config.min_connections = value;
        }
        if let Some(value) = parse_var::<usize, _>(&lookup, "TENANTSCALE_POOL_MAX")? {
            config.max_connections = value;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TENANTSCALE_POOL_ACQUIRE_TIMEOUT_MS")? {
            config.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TENANTSCALE_POOL_IDLE_TIMEOUT_MS")? {
            config.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TENANTSCALE_POOL_REAP_INTERVAL_MS")? {
            config.reap_interval = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the minimum connections.
    pub fn with_min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the maximum connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the reaper interval.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Set the create timeout.
    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    /// Set the destroy timeout.
    pub fn with_destroy_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_timeout = timeout;
        self
    }

    /// Set the pause between replacement attempts.
    pub fn with_create_retry_interval(mut self, interval: Duration) -> Self {
        self.create_retry_interval = interval;
        self
    }

    /// Set the health monitor interval.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Check the bounds are usable.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_connections == 0 {
            return Err(PoolError::Config(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.reap_interval.is_zero() {
            return Err(PoolError::Config("reap_interval must be non-zero".into()));
        }
        if self.health_check_interval.is_zero() {
            return Err(PoolError::Config(
                "health_check_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Endpoint and key of the backing store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub url: String,
    pub key: String,
}

impl StoreCredentials {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
        }
    }

    /// Read `BACKING_STORE_URL` and `BACKING_STORE_KEY`.
    ///
    /// Fails with [`PoolError::MissingCredentials`] if either is unset or empty.
    pub fn from_env() -> PoolResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials from an arbitrary variable lookup.
    pub fn from_lookup<L>(lookup: L) -> PoolResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| PoolError::MissingCredentials(format!("{name} not set")))
        };

        Ok(Self {
            url: read("BACKING_STORE_URL")?,
            key: read("BACKING_STORE_KEY")?,
        })
    }

    /// Endpoint shortened for log output.
    pub fn redacted_url(&self) -> String {
        let prefix: String = self.url.chars().take(20).collect();
        format!("{prefix}...")
    }
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("url", &self.redacted_url())
            .field("key", &"<redacted>")
            .finish()
    }
}

fn parse_var<T, L>(lookup: &L, name: &str) -> PoolResult<Option<T>>
where
    T: std::str::FromStr,
    L: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PoolError::Config(format!("Invalid {name}: {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.reap_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("TENANTSCALE_POOL_MIN", "2"),
            ("TENANTSCALE_POOL_MAX", "4"),
            ("TENANTSCALE_POOL_ACQUIRE_TIMEOUT_MS", "200"),
        ]))
        .unwrap();

        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.acquire_timeout, Duration::from_millis(200));
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let err = PoolConfig::from_lookup(lookup(&[("TENANTSCALE_POOL_MAX", "lots")])).unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let err = PoolConfig::from_lookup(lookup(&[("TENANTSCALE_POOL_REAP_INTERVAL_MS", "0")]))
            .unwrap_err();
        assert!(matches!(err, PoolError::Config(ref msg) if msg.contains("reap_interval")));

        let err = PoolConfig::new(0, 2)
            .with_health_check_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, PoolError::Config(ref msg) if msg.contains("health_check_interval")));
    }

    #[test]
    fn test_min_above_max_rejected() {
        assert!(PoolConfig::new(10, 4).validate().is_err());
        assert!(PoolConfig::new(0, 0).validate().is_err());
        assert!(PoolConfig::new(0, 1).validate().is_ok());
    }

    #[test]
    fn test_missing_credentials_fail_fast() {
        let err = StoreCredentials::from_lookup(lookup(&[("BACKING_STORE_URL", "https://db.test")]))
            .unwrap_err();
        assert_eq!(
            err,
            PoolError::MissingCredentials("BACKING_STORE_KEY not set".into())
        );

        let err = StoreCredentials::from_lookup(lookup(&[
            ("BACKING_STORE_URL", " "),
            ("BACKING_STORE_KEY", "secret"),
        ]))
        .unwrap_err();
        assert!(matches!(err, PoolError::MissingCredentials(_)));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = StoreCredentials::new("https://abcdefghijklmnopqrstuvwxyz.test", "secret");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("https://abcdefghijkl..."));
    }
}
