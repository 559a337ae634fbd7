//! Two-tier caching for computed tenant metrics.
//!
//! A shared tier (Redis, enabled by default) sits in front of an in-process
//! fallback map. Shared-tier failures are logged and absorbed, so callers
//! only ever see hits or misses.
//!
//! # Features
//!
//! - `redis` - Redis shared tier (enabled by default)
//! - **Graceful degradation** - local fallback on every read and write
//! - **Compression** - optional gzip of serialized values
//! - **Pattern invalidation** - glob clearing over both tiers
//!
//! # Examples
//!
//! ```no_run
//! use tenantscale_cache::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CacheError> {
//!     let cache = TieredCache::new(CacheConfig::from_env())?;
//!
//!     cache
//!         .set_with_options(
//!             "tenant:42:daily",
//!             &vec![12u32, 7, 3],
//!             CacheOptions::default()
//!                 .with_ttl(Duration::from_secs(60))
//!                 .compressed(),
//!         )
//!         .await;
//!
//!     let daily: Option<Vec<u32>> = cache.get("tenant:42:daily").await;
//!     println!("{daily:?}");
//!
//!     cache.clear_pattern("tenant:42:*").await;
//!     cache.close().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod local;
pub mod stats;
pub mod tier;
pub mod tiered;

#[cfg(feature = "redis")]
pub mod redis_tier;

pub use config::{CacheConfig, DEFAULT_KEY_PREFIX};
pub use error::{CacheError, CacheResult};
pub use local::LocalTier;
pub use stats::{CacheHealth, CacheStats};
pub use tier::SharedTier;
pub use tiered::{CacheOptions, TieredCache};

#[cfg(feature = "redis")]
pub use redis_tier::RedisTier;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::CacheConfig;
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::stats::{CacheHealth, CacheStats};
    pub use crate::tier::SharedTier;
    pub use crate::tiered::{CacheOptions, TieredCache};

    #[cfg(feature = "redis")]
    pub use crate::redis_tier::RedisTier;
}
