//! Error types for cache operations.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
///
/// Only the shared-tier seam and the codec return these; [`crate::TieredCache`]
/// logs them and degrades to the local tier.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Gzip error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Check if this error means the shared tier could not be reached.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout => true,
            #[cfg(feature = "redis")]
            Self::Redis(e) => e.is_io_error() || e.is_connection_dropped() || e.is_timeout(),
            _ => false,
        }
    }
}
