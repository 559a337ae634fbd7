//! Shared cache tier trait definition.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Distributed store consulted before the local tier.
///
/// Keys arrive fully prefixed. Values are opaque bytes produced by
/// [`crate::codec::encode`].
#[async_trait]
pub trait SharedTier: Send + Sync {
    /// Get a value.
    ///
    /// Returns `Ok(None)` if the key does not exist or has expired.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set a value that expires after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete every key matching a glob pattern. Returns the number deleted.
    async fn delete_matching(&self, pattern: &str) -> CacheResult<u64>;

    /// Round-trip check.
    async fn ping(&self) -> CacheResult<()>;

    /// Human-readable memory usage, if the store reports one.
    async fn memory_usage(&self) -> CacheResult<Option<String>>;

    /// Number of keys held.
    async fn key_count(&self) -> CacheResult<u64>;

    /// Drop any open connection.
    async fn close(&self) {}
}
