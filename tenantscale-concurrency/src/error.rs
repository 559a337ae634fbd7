//! Error types for the coordinator.

use std::time::Duration;
use thiserror::Error;

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Hard-stop conditions raised by the coordinator.
///
/// Failures of individual units of work are never reported through this
/// type; they are collected into [`crate::BatchResult::failures`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The circuit breaker is open and processing is temporarily disabled.
    #[error("Circuit breaker is open, processing temporarily disabled (retry in {retry_after:?})")]
    CircuitOpen {
        /// Remaining cooldown before the breaker closes again.
        retry_after: Duration,
    },
}

impl CoordinatorError {
    /// Check if the caller may retry the whole run later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}
