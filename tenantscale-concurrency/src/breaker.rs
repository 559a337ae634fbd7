//! Windowed circuit breaker.
//!
//! Failures are counted inside a fixed window that restarts every
//! `failure_window`. Once the count reaches the threshold the breaker opens
//! and rejects work until `cooldown` has elapsed, after which it closes on
//! its own with a fresh window. There is no half-open probing state.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Work is admitted.
    Closed,
    /// Work is rejected until the cooldown elapses.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within the window that open the breaker.
    pub threshold: u32,
    /// Length of the failure counting window.
    pub failure_window: Duration,
    /// How long the breaker stays open.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            failure_window: Duration::from_secs(5 * 60),
            cooldown: Duration::from_secs(5 * 60),
        }
    }
}

struct BreakerState {
    state: CircuitState,
    failures: u32,
    window_start: Instant,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding the coordinator.
pub struct CircuitBreaker {
    config: Mutex<BreakerConfig>,
    inner: Mutex<BreakerState>,
    total_failures: AtomicU64,
    total_trips: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config: Mutex::new(config),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                window_start: Instant::now(),
                opened_at: None,
            }),
            total_failures: AtomicU64::new(0),
            total_trips: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    /// Current state, closing the breaker first if its cooldown has elapsed.
    pub fn state(&self) -> CircuitState {
        self.maybe_close();
        self.inner.lock().state
    }

    /// Whether the breaker is open.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Check admission. Returns the remaining cooldown when open.
    pub fn check(&self) -> Result<(), Duration> {
        self.maybe_close();
        let cooldown = self.config.lock().cooldown;
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                Err(cooldown.saturating_sub(opened_at.elapsed()))
            }
            _ => Ok(()),
        }
    }

    /// Record `count` failed units of work and open the breaker if the
    /// window threshold is reached. Returns `true` if this call opened it.
    pub fn record_failures(&self, count: u32) -> bool {
        if count == 0 {
            return false;
        }
        self.total_failures
            .fetch_add(u64::from(count), Ordering::Relaxed);

        let config = self.config.lock().clone();
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            return false;
        }

        if inner.window_start.elapsed() > config.failure_window {
            debug!(
                previous_failures = inner.failures,
                "Failure window elapsed, resetting breaker count"
            );
            inner.failures = 0;
            inner.window_start = Instant::now();
        }

        inner.failures = inner.failures.saturating_add(count);

        if inner.failures >= config.threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            self.total_trips.fetch_add(1, Ordering::Relaxed);
            error!(
                failures = inner.failures,
                threshold = config.threshold,
                cooldown = ?config.cooldown,
                "Circuit breaker opened due to high failure rate"
            );
            return true;
        }

        false
    }

    /// Restart the failure window if it has elapsed, without recording.
    pub fn roll_window(&self) {
        let window = self.config.lock().failure_window;
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Closed && inner.window_start.elapsed() > window {
            inner.failures = 0;
            inner.window_start = Instant::now();
        }
    }

    /// Force the breaker closed and clear the window.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.window_start = Instant::now();
        inner.opened_at = None;
    }

    /// Replace the threshold and timings.
    pub fn reconfigure(&self, config: BreakerConfig) {
        *self.config.lock() = config;
    }

    /// Failures counted in the current window.
    pub fn window_failures(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Snapshot of counters.
    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            state: self.state(),
            window_failures: self.window_failures(),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_trips: self.total_trips.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    fn maybe_close(&self) {
        let cooldown = self.config.lock().cooldown;
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return;
        }
        if let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= cooldown
        {
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.window_start = Instant::now();
            inner.opened_at = None;
            info!("Circuit breaker closed, processing resumed");
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

/// Circuit breaker counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub window_failures: u32,
    pub total_failures: u64,
    pub total_trips: u64,
    pub total_rejections: u64,
}
