//! Scaling infrastructure for running per-tenant work across many accounts.
//!
//! Three components, each in its own crate and re-exported here behind a
//! feature flag:
//!
//! - `concurrency` - [`ConcurrencyCoordinator`]: bounded-parallel batch
//!   processing with retry, adaptive batch sizing and a circuit breaker
//! - `pool` - [`ResourcePool`]: a bounded set of backing-store connections
//!   with FIFO waiters, idle reaping and health probing
//! - `cache` - [`TieredCache`]: a Redis shared tier in front of an
//!   in-process fallback
//!
//! [`telemetry`] installs a `tracing` subscriber and [`ScalingConfig`] reads
//! every component's settings from the environment.
//!
//! # Examples
//!
//! ```no_run
//! use tenantscale::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     tenantscale::telemetry::init();
//!     let config = ScalingConfig::from_env()?;
//!
//!     let coordinator = ConcurrencyCoordinator::new(config.coordinator);
//!     let pool = ResourcePool::new(config.pool, RestStoreFactory::from_env()?)?;
//!     let cache = TieredCache::new(config.cache)?;
//!
//!     let tenants: Vec<String> = vec!["t-1".into(), "t-2".into()];
//!     let result = coordinator
//!         .process_with_concurrency(
//!             tenants,
//!             |tenant| {
//!                 let pool = pool.clone();
//!                 let cache = cache.clone();
//!                 async move {
//!                     let key = format!("tenant:{tenant}:daily");
//!                     if let Some(rows) = cache.get::<serde_json::Value>(&key).await {
//!                         return Ok(rows);
//!                     }
//!                     let rows = pool
//!                         .with_connection(|client| async move {
//!                             client.select("appointments", "id", 100).await
//!                         })
//!                         .await?;
//!                     cache.set(&key, &rows, Some(Duration::from_secs(900))).await;
//!                     Ok::<_, PoolError>(rows)
//!                 }
//!             },
//!             ConcurrencyOverrides::none(),
//!         )
//!         .await?;
//!
//!     println!("{} tenants processed", result.successes.len());
//!
//!     coordinator.shutdown();
//!     pool.close().await;
//!     cache.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod telemetry;

pub use config::{ConfigError, ScalingConfig};

// Re-export component crates
#[cfg(feature = "concurrency")]
pub use tenantscale_concurrency;

#[cfg(feature = "pool")]
pub use tenantscale_pool;

#[cfg(feature = "cache")]
pub use tenantscale_cache;

#[cfg(feature = "concurrency")]
pub use tenantscale_concurrency::{
    BatchResult, ConcurrencyCoordinator, ConcurrencyOverrides, CoordinatorConfig,
    CoordinatorError, ItemFailure, ProcessingStats,
};

#[cfg(feature = "pool")]
pub use tenantscale_pool::{
    ConnectionFactory, PoolConfig, PoolError, PoolHealth, PoolStats, ResourcePool,
    StoreCredentials,
};

#[cfg(feature = "rest")]
pub use tenantscale_pool::{RestClient, RestStoreFactory};

#[cfg(feature = "cache")]
pub use tenantscale_cache::{
    CacheConfig, CacheError, CacheHealth, CacheOptions, CacheStats, SharedTier, TieredCache,
};

// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, ScalingConfig};

    #[cfg(feature = "concurrency")]
    pub use tenantscale_concurrency::prelude::*;

    #[cfg(feature = "pool")]
    pub use tenantscale_pool::prelude::*;

    #[cfg(feature = "cache")]
    pub use tenantscale_cache::prelude::*;
}
