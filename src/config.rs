//! Process-wide configuration for all scaling components.

use thiserror::Error;
use tracing::{debug, info};

#[cfg(feature = "cache")]
use tenantscale_cache::CacheConfig;
#[cfg(feature = "concurrency")]
use tenantscale_concurrency::CoordinatorConfig;
#[cfg(feature = "pool")]
use tenantscale_pool::{PoolConfig, PoolError};

/// Errors raised while assembling configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid pool settings
    #[cfg(feature = "pool")]
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// `.env` file present but unreadable
    #[error("Failed to load .env file: {0}")]
    DotEnv(String),
}

/// Configuration for every enabled component, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct ScalingConfig {
    #[cfg(feature = "concurrency")]
    pub coordinator: CoordinatorConfig,

    #[cfg(feature = "pool")]
    pub pool: PoolConfig,

    #[cfg(feature = "cache")]
    pub cache: CacheConfig,
}

impl ScalingConfig {
    /// Load `.env` (when present) and then read every component's variables.
    ///
    /// Variables already set in the process environment win over `.env`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tenantscale::ScalingConfig;
    ///
    /// let config = ScalingConfig::from_env().unwrap();
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => info!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => debug!("No .env file found"),
            Err(e) => return Err(ConfigError::DotEnv(e.to_string())),
        }

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            #[cfg(feature = "concurrency")]
            coordinator: CoordinatorConfig::from_lookup(&lookup),
            #[cfg(feature = "pool")]
            pool: PoolConfig::from_lookup(&lookup)?,
            #[cfg(feature = "cache")]
            cache: CacheConfig::from_lookup(&lookup),
        })
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
    fn test_components_read_their_variables() {
        let config = ScalingConfig::from_lookup(lookup(&[
            ("TENANTSCALE_BATCH_SIZE", "20"),
            ("TENANTSCALE_POOL_MAX", "8"),
            ("REDIS_URL", "redis://cache:6379"),
        ]))
        .unwrap();

        #[cfg(feature = "concurrency")]
        assert_eq!(config.coordinator.batch_size, 20);
        #[cfg(feature = "pool")]
        assert_eq!(config.pool.max_connections, 8);
        #[cfg(feature = "cache")]
        assert_eq!(config.cache.redis_url.as_deref(), Some("redis://cache:6379"));
    }

    #[cfg(feature = "pool")]
    #[test]
    fn test_invalid_pool_settings_fail() {
        let err = ScalingConfig::from_lookup(lookup(&[
            ("TENANTSCALE_POOL_MIN", "10"),
            ("TENANTSCALE_POOL_MAX", "2"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ConfigError::Pool(PoolError::Config(_))));
    }
}
