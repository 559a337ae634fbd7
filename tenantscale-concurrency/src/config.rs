//! Coordinator configuration.

use std::time::Duration;
use tracing::info;

/// Hard upper bound for the computed default ceiling.
const DEFAULT_CONCURRENCY_CAP: usize = 50;

/// Lower bound the self-tuner never goes below.
pub const MIN_TUNED_CONCURRENCY: usize = 10;

/// Upper bound the self-tuner never goes above.
pub const MAX_TUNED_CONCURRENCY: usize = 100;

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Maximum units of work in flight at once.
    pub max_concurrency: usize,
    /// Default number of items per batch.
    pub batch_size: usize,
    /// Queue timeout carried for callers that bound a whole run.
    pub queue_timeout: Duration,
    /// Failures within the window that open the circuit breaker.
    pub circuit_breaker_threshold: u32,
    /// How long the breaker stays open before closing on its own.
    pub circuit_breaker_cooldown: Duration,
    /// Length of the failure counting window.
    pub failure_window: Duration,
    /// Resize batches based on recent latency and success rate.
    pub adaptive_batching: bool,
    /// Attempts per unit of work, including the first.
    pub retry_attempts: u32,
    /// Base delay of the exponential backoff.
    pub retry_delay: Duration,
    /// Pause between concurrency sub-slices of a batch.
    pub sub_batch_pause: Duration,
    /// Interval of the self-tuning loop.
    pub tuning_interval: Duration,
    /// Run the self-tuning loop at all.
    pub auto_tune: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: optimal_concurrency(),
            batch_size: 50,
            queue_timeout: Duration::from_secs(30),
            circuit_breaker_threshold: 10,
            circuit_breaker_cooldown: Duration::from_secs(5 * 60),
            failure_window: Duration::from_secs(5 * 60),
            adaptive_batching: true,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            sub_batch_pause: Duration::from_millis(10),
            tuning_interval: Duration::from_secs(2 * 60),
            auto_tune: true,
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<L>(lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = parse_var::<usize, _>(&lookup, "TENANTSCALE_MAX_CONCURRENCY") {
            config.max_concurrency = value;
        }
        if let Some(value) = parse_var::<usize, _>(&lookup, "TENANTSCALE_BATCH_SIZE") {
            config.batch_size = value;
        }
        if let Some(value) = parse_var::<u32, _>(&lookup, "TENANTSCALE_RETRY_ATTEMPTS") {
            config.retry_attempts = value;
        }
        if let Some(value) = parse_var::<u64, _>(&lookup, "TENANTSCALE_RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(value);
        }
        if let Some(value) = parse_var::<u32, _>(&lookup, "TENANTSCALE_CIRCUIT_THRESHOLD") {
            config.circuit_breaker_threshold = value;
        }

        config
    }

    /// Set the concurrency ceiling.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Set the default batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the queue timeout.
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Set the breaker failure threshold.
    pub fn with_circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker_threshold = threshold;
        self
    }

    /// Set the breaker cooldown.
    pub fn with_circuit_breaker_cooldown(mut self, cooldown: Duration) -> Self {
        self.circuit_breaker_cooldown = cooldown;
        self
    }

    /// Set the failure counting window.
    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    /// Enable or disable adaptive batching.
    pub fn with_adaptive_batching(mut self, enabled: bool) -> Self {
        self.adaptive_batching = enabled;
        self
    }

    /// Set the attempts per unit of work.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the base backoff delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the pause between sub-slices.
    pub fn with_sub_batch_pause(mut self, pause: Duration) -> Self {
        self.sub_batch_pause = pause;
        self
    }

    /// Set the self-tuning interval.
    pub fn with_tuning_interval(mut self, interval: Duration) -> Self {
        self.tuning_interval = interval;
        self
    }

    /// Enable or disable the self-tuning loop.
    pub fn with_auto_tune(mut self, enabled: bool) -> Self {
        self.auto_tune = enabled;
        self
    }

    /// Apply per-call overrides on top of this configuration.
    ///
    /// Only fields set in `overrides` change; everything else is copied.
    pub fn merged(&self, overrides: &ConcurrencyOverrides) -> Self {
        let mut config = self.clone();
        if let Some(max) = overrides.max_concurrency {
            config.max_concurrency = max;
        }
        if let Some(size) = overrides.batch_size {
            config.batch_size = size;
        }
        if let Some(timeout) = overrides.queue_timeout {
            config.queue_timeout = timeout;
        }
        if let Some(attempts) = overrides.retry_attempts {
            config.retry_attempts = attempts;
        }
        if let Some(delay) = overrides.retry_delay {
            config.retry_delay = delay;
        }
        if let Some(adaptive) = overrides.adaptive_batching {
            config.adaptive_batching = adaptive;
        }
        config
    }
}

/// Per-call overrides for [`crate::ConcurrencyCoordinator::process_with_concurrency`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConcurrencyOverrides {
    pub max_concurrency: Option<usize>,
    pub batch_size: Option<usize>,
    pub queue_timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub adaptive_batching: Option<bool>,
}

impl ConcurrencyOverrides {
    /// No overrides.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = Some(timeout);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn adaptive_batching(mut self, enabled: bool) -> Self {
        self.adaptive_batching = Some(enabled);
        self
    }
}

/// Compute a default concurrency ceiling from CPU count and total memory.
pub fn optimal_concurrency() -> usize {
    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let memory_gb = system.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);

    let optimal = concurrency_for(cpu_count, memory_gb);

    info!(
        cpu_count,
        memory_gb = memory_gb.round() as u64,
        optimal,
        "Calculated optimal concurrency"
    );

    optimal
}

/// `min(max(2 * cpus, 4) + min(floor(mem_gb / 2), 20), 50)`
pub(crate) fn concurrency_for(cpu_count: usize, memory_gb: f64) -> usize {
    let base = (cpu_count * 2).max(4);
    let memory_factor = ((memory_gb / 2.0).floor().max(0.0) as usize).min(20);
    (base + memory_factor).min(DEFAULT_CONCURRENCY_CAP)
}

fn parse_var<T, L>(lookup: &L, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    L: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|v| v.trim().parse().ok())
}
