//! Bounded connection pooling for expensive backing-store connections.
//!
//! # Features
//!
//! - `rest` - REST backing-store factory over `reqwest` (enabled by default)
//! - **FIFO waiters** - saturated callers queue and are served in arrival order
//! - **Idle reaping** - idle connections are destroyed down to the configured floor
//! - **Health monitoring** - periodic probe plus replacement of lost connections
//!
//! # Examples
//!
//! ```no_run
//! use tenantscale_pool::*;
//!
//! # #[cfg(feature = "rest")]
//! #[tokio::main]
//! async fn main() -> Result<(), PoolError> {
//!     let pool = ResourcePool::new(PoolConfig::from_env()?, RestStoreFactory::from_env()?)?;
//!     pool.initialize().await;
//!
//!     let rows = pool
//!         .with_connection(|client| async move { client.select("tenants", "id", 10).await })
//!         .await?;
//!     println!("{rows}");
//!
//!     pool.close().await;
//!     Ok(())
//! }
//! # #[cfg(not(feature = "rest"))]
//! # fn main() {}
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod pool;

#[cfg(feature = "rest")]
pub mod rest;

pub use config::{PoolConfig, StoreCredentials};
pub use connection::{ConnectionInfo, generate_connection_id};
pub use error::{PoolError, PoolResult};
pub use factory::ConnectionFactory;
pub use pool::{DEFAULT_BATCH_SIZE, PoolHealth, PoolStats, ResourcePool};

#[cfg(feature = "rest")]
pub use rest::{RestClient, RestStoreFactory};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{PoolConfig, StoreCredentials};
    pub use crate::error::{PoolError, PoolResult};
    pub use crate::factory::ConnectionFactory;
    pub use crate::pool::{PoolHealth, PoolStats, ResourcePool};

    #[cfg(feature = "rest")]
    pub use crate::rest::{RestClient, RestStoreFactory};
}
