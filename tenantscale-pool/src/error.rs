//! Pool error types.

use std::time::Duration;
use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Pool errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// No connection became free within the acquire timeout.
    #[error("Connection acquire timeout after {0:?}")]
    AcquireTimeout(Duration),

    /// The factory could not establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The factory did not finish creating a connection in time.
    #[error("Connection creation timed out after {0:?}")]
    CreateTimeout(Duration),

    /// Backing store endpoint or key is not configured.
    #[error("Missing required backing store configuration: {0}")]
    MissingCredentials(String),

    /// The pool was closed.
    #[error("Connection pool is shutting down")]
    ShuttingDown,

    /// The health probe failed.
    #[error("Health probe failed: {0}")]
    Probe(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PoolError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AcquireTimeout(_) | Self::ConnectionFailed(_) | Self::CreateTimeout(_)
        )
    }

    /// Check if this error signals saturation rather than a broken store.
    pub fn is_saturation(&self) -> bool {
        matches!(self, Self::AcquireTimeout(_))
    }
}

#[cfg(feature = "rest")]
impl From<reqwest::Error> for PoolError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::ConnectionFailed(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(PoolError::AcquireTimeout(Duration::from_millis(200)).is_retryable());
        assert!(PoolError::ConnectionFailed("refused".into()).is_retryable());
        assert!(!PoolError::ShuttingDown.is_retryable());
        assert!(!PoolError::MissingCredentials("BACKING_STORE_URL".into()).is_retryable());
    }

    #[test]
    fn test_timeout_display() {
        let err = PoolError::AcquireTimeout(Duration::from_millis(200));
        assert_eq!(err.to_string(), "Connection acquire timeout after 200ms");
        assert!(err.is_saturation());
    }
}
