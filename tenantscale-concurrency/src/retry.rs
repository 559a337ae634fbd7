//! Retry with exponential backoff.
//!
//! Failures are returned as [`RetryOutcome::Exhausted`] values rather than
//! errors so the coordinator can collect them per item.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Exponential backoff: `initial * multiplier^attempt`, capped at `max`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Backoff {
    /// Doubling backoff starting at `initial`.
    pub fn exponential(initial: Duration) -> Self {
        Self {
            initial,
            multiplier: 2.0,
            max: Duration::from_secs(5 * 60),
        }
    }

    /// Set the maximum delay.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Delay to wait after the failed attempt `attempt` (1-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let factor = self.multiplier.powi(exponent);
        let millis = (self.initial.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max)
    }
}

/// Retry policy for one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::exponential(base_delay),
        }
    }

    /// Run `op` until it succeeds or attempts run out.
    ///
    /// `on_attempt` receives the latency of every attempt, successful or not.
    pub async fn run<F, Fut, R, E, L>(&self, mut op: F, mut on_attempt: L) -> RetryOutcome<R, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: std::fmt::Display,
        L: FnMut(Duration, bool),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            let result = op().await;
            on_attempt(started.elapsed(), result.is_ok());

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Retry succeeded");
                    }
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    };
                }
                Err(error) if attempt >= max_attempts => {
                    warn!(
                        max_attempts,
                        error = %error,
                        "All retry attempts failed"
                    );
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    let delay = self.backoff.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay = ?delay,
                        error = %error,
                        "Processing attempt failed, retrying"
                    );
                    if delay > Duration::ZERO {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Result of a retried unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<R, E> {
    Succeeded { value: R, attempts: u32 },
    Exhausted { error: E, attempts: u32 },
}

impl<R, E> RetryOutcome<R, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}
