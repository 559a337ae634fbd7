//! Bounded-concurrency batch processing for multi-tenant workloads.
//!
//! Runs many independent units of work (one per tenant, typically) under a
//! concurrency ceiling, with per-item retry and exponential backoff,
//! adaptive batch sizing and a windowed circuit breaker.
//!
//! # Examples
//!
//! ```no_run
//! use tenantscale_concurrency::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CoordinatorError> {
//!     let coordinator = ConcurrencyCoordinator::new(CoordinatorConfig::default());
//!
//!     let tenants: Vec<String> = (0..237).map(|i| format!("tenant-{i}")).collect();
//!     let result = coordinator
//!         .process_with_concurrency(
//!             tenants,
//!             |tenant| async move { Ok::<_, String>(tenant.len()) },
//!             ConcurrencyOverrides::none(),
//!         )
//!         .await?;
//!
//!     println!("{} ok, {} failed", result.successes.len(), result.failures.len());
//!     Ok(())
//! }
//! ```
//!
//! Item failures never fail the call; the only hard error is
//! [`CoordinatorError::CircuitOpen`], returned when the breaker is open at
//! call time.

pub mod breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod retry;
pub mod stats;

pub use breaker::{BreakerConfig, BreakerStats, CircuitBreaker, CircuitState};
pub use config::{optimal_concurrency, ConcurrencyOverrides, CoordinatorConfig};
pub use coordinator::{BatchResult, ConcurrencyCoordinator, ItemFailure};
pub use error::{CoordinatorError, CoordinatorResult};
pub use retry::{Backoff, RetryOutcome, RetryPolicy};
pub use stats::ProcessingStats;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConcurrencyOverrides, CoordinatorConfig};
    pub use crate::coordinator::{BatchResult, ConcurrencyCoordinator, ItemFailure};
    pub use crate::error::{CoordinatorError, CoordinatorResult};
    pub use crate::stats::ProcessingStats;
}
