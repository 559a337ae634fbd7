//! Bounded-concurrency batch coordinator.

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::config::{
    ConcurrencyOverrides, CoordinatorConfig, MAX_TUNED_CONCURRENCY, MIN_TUNED_CONCURRENCY,
};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::stats::{ProcessingStats, StatsState};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const SLOW_LATENCY: Duration = Duration::from_secs(5);
const FAST_LATENCY: Duration = Duration::from_secs(2);
const TUNE_UP_LATENCY: Duration = Duration::from_secs(1);
const TUNE_DOWN_LATENCY: Duration = Duration::from_secs(10);
const TUNE_STEP: usize = 5;
const MIN_ADAPTIVE_BATCH: usize = 10;
const MAX_ADAPTIVE_BATCH: usize = 100;

/// Outcome of one [`ConcurrencyCoordinator::process_with_concurrency`] run.
#[derive(Debug)]
pub struct BatchResult<T, R, E> {
    /// Values of successful units of work, in input order.
    pub successes: Vec<R>,
    /// Items that failed after every retry, in input order.
    pub failures: Vec<ItemFailure<T, E>>,
    /// Wall-clock time of the run.
    pub processing_time: Duration,
    /// Batch size chosen for this run.
    pub batch_size: usize,
    /// Number of batches actually processed.
    pub batch_count: usize,
    /// Trailing items not processed because the breaker tripped mid-run.
    pub skipped: usize,
    /// Whether the breaker opened during this run.
    pub circuit_tripped: bool,
}

impl<T, R, E> BatchResult<T, R, E> {
    fn new(batch_size: usize) -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
            processing_time: Duration::ZERO,
            batch_size,
            batch_count: 0,
            skipped: 0,
            circuit_tripped: false,
        }
    }

    /// Items that reached a final outcome.
    pub fn completed(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    /// Fraction of completed items that succeeded.
    pub fn success_rate(&self) -> f64 {
        match self.completed() {
            0 => 1.0,
            n => self.successes.len() as f64 / n as f64,
        }
    }
}

/// A unit of work that failed after every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure<T, E> {
    /// Position of the item in the input list.
    pub index: usize,
    /// The original item, kept for diagnostics.
    pub item: T,
    /// Error of the last attempt.
    pub error: E,
    /// Attempts made.
    pub attempts: u32,
}

struct CoordinatorInner {
    config: RwLock<CoordinatorConfig>,
    stats: Mutex<StatsState>,
    breaker: CircuitBreaker,
    tuner: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if let Some(handle) = self.tuner.get_mut().take() {
            handle.abort();
        }
    }
}

/// Runs many independent units of work under a concurrency ceiling with
/// retry, adaptive batch sizing and a circuit breaker.
///
/// Cloning is cheap and shares stats, breaker and the tuning loop.
#[derive(Clone)]
pub struct ConcurrencyCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl ConcurrencyCoordinator {
    /// Create a coordinator. Starts the self-tuning loop when
    /// `config.auto_tune` is set and a tokio runtime is available.
    pub fn new(config: CoordinatorConfig) -> Self {
        info!(
            max_concurrency = config.max_concurrency,
            batch_size = config.batch_size,
            circuit_breaker_threshold = config.circuit_breaker_threshold,
            retry_attempts = config.retry_attempts,
            retry_delay = ?config.retry_delay,
            adaptive_batching = config.adaptive_batching,
            "Concurrency coordinator initialized"
        );

        let breaker = CircuitBreaker::new(breaker_config(&config));
        let auto_tune = config.auto_tune;
        let coordinator = Self {
            inner: Arc::new(CoordinatorInner {
                config: RwLock::new(config),
                stats: Mutex::new(StatsState::default()),
                breaker,
                tuner: Mutex::new(None),
            }),
        };

        if auto_tune {
            coordinator.start_tuning();
        }

        coordinator
    }

    /// Current configuration, including any self-tuned ceiling.
    pub fn config(&self) -> CoordinatorConfig {
        self.inner.config.read().clone()
    }

    /// Replace the configuration.
    pub fn set_config(&self, config: CoordinatorConfig) {
        self.inner.breaker.reconfigure(breaker_config(&config));
        *self.inner.config.write() = config;
    }

    /// The circuit breaker guarding this coordinator.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    /// Process `items` with `unit_of_work`, batching, retrying and bounding
    /// concurrency.
    ///
    /// Fails only when the circuit breaker is open at call time. Item
    /// failures are collected in the result; if the breaker trips mid-run
    /// the remaining batches are skipped and partial results returned.
    pub async fn process_with_concurrency<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        unit_of_work: F,
        overrides: ConcurrencyOverrides,
    ) -> CoordinatorResult<BatchResult<T, R, E>>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Display,
    {
        let started = Instant::now();
        let config = self.inner.config.read().merged(&overrides);
        let total = items.len();

        info!(
            item_count = total,
            max_concurrency = config.max_concurrency,
            batch_size = config.batch_size,
            "Starting batch processing"
        );

        if let Err(retry_after) = self.inner.breaker.check() {
            warn!(
                item_count = total,
                retry_after = ?retry_after,
                "Rejecting work, circuit breaker is open"
            );
            return Err(CoordinatorError::CircuitOpen { retry_after });
        }

        let batch_size = self.optimal_batch_size(&config, total);
        let max_concurrency = config.max_concurrency.max(1);
        let policy = RetryPolicy::new(config.retry_attempts, config.retry_delay);
        let mut result = BatchResult::new(batch_size);

        if total == 0 {
            result.processing_time = started.elapsed();
            return Ok(result);
        }

        let batch_total = total.div_ceil(batch_size);
        debug!(
            total_items = total,
            batch_count = batch_total,
            batch_size,
            "Processing strategy"
        );

        self.inner.stats.lock().queue_size = total;

        let mut remaining = items.into_iter().enumerate();
        loop {
            let batch: Vec<(usize, T)> = remaining.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }

            let outcomes = self
                .run_batch(&batch, &unit_of_work, &policy, max_concurrency, config.sub_batch_pause)
                .await;
            result.batch_count += 1;

            let mut batch_failures = 0u32;
            for ((index, item), outcome) in batch.into_iter().zip(outcomes) {
                match outcome {
                    RetryOutcome::Succeeded { value, .. } => result.successes.push(value),
                    RetryOutcome::Exhausted { error, attempts } => {
                        batch_failures += 1;
                        result.failures.push(ItemFailure {
                            index,
                            item,
                            error,
                            attempts,
                        });
                    }
                }
            }

            if batch_failures > 0 {
                if self.inner.breaker.record_failures(batch_failures) {
                    result.circuit_tripped = true;
                }
            } else {
                self.inner.breaker.roll_window();
            }

            debug!(
                batch_index = result.batch_count,
                batch_total,
                processed = result.completed(),
                total,
                batch_failures,
                "Batch processing progress"
            );

            if result.circuit_tripped {
                result.skipped = remaining.len();
                error!(
                    skipped = result.skipped,
                    "Circuit breaker tripped mid-run, skipping remaining batches"
                );
                break;
            }

            // Another run sharing this coordinator may have opened the breaker.
            if self.inner.breaker.is_open() {
                result.circuit_tripped = true;
                result.skipped = remaining.len();
                warn!(
                    skipped = result.skipped,
                    "Circuit breaker opened by a concurrent run, skipping remaining batches"
                );
                break;
            }
        }

        result.processing_time = started.elapsed();
        {
            let mut stats = self.inner.stats.lock();
            stats.total_processed += result.completed() as u64;
            stats.queue_size = 0;
        }

        info!(
            total_items = total,
            successes = result.successes.len(),
            failures = result.failures.len(),
            skipped = result.skipped,
            processing_time_ms = result.processing_time.as_millis() as u64,
            "Batch processing completed"
        );

        Ok(result)
    }

    /// Run one batch in sub-slices of at most `max_concurrency` items.
    async fn run_batch<T, R, E, F, Fut>(
        &self,
        batch: &[(usize, T)],
        unit_of_work: &F,
        policy: &RetryPolicy,
        max_concurrency: usize,
        pause: Duration,
    ) -> Vec<RetryOutcome<R, E>>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Display,
    {
        let mut outcomes = Vec::with_capacity(batch.len());
        let slice_count = batch.len().div_ceil(max_concurrency);

        for (slice_index, slice) in batch.chunks(max_concurrency).enumerate() {
            self.inner.stats.lock().current_concurrency = slice.len();

            let pending = slice
                .iter()
                .map(|(_, item)| self.run_item(item.clone(), unit_of_work, policy));
            outcomes.extend(join_all(pending).await);

            if slice_index + 1 < slice_count && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        self.inner.stats.lock().current_concurrency = 0;
        outcomes
    }

    async fn run_item<T, R, E, F, Fut>(
        &self,
        item: T,
        unit_of_work: &F,
        policy: &RetryPolicy,
    ) -> RetryOutcome<R, E>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Display,
    {
        let stats = &self.inner.stats;
        let outcome = policy
            .run(
                || unit_of_work(item.clone()),
                |latency, _| stats.lock().record_latency(latency),
            )
            .await;

        let mut stats = stats.lock();
        if outcome.is_success() {
            stats.success_count += 1;
        } else {
            stats.failure_count += 1;
        }
        stats.queue_size = stats.queue_size.saturating_sub(1);
        outcome
    }

    /// Pick a batch size from recent latency and success rate.
    fn optimal_batch_size(&self, config: &CoordinatorConfig, total: usize) -> usize {
        if total == 0 {
            return 0;
        }

        let base = config.batch_size.max(1);
        if !config.adaptive_batching {
            return base.min(total);
        }

        let (average, success_rate) = {
            let stats = self.inner.stats.lock();
            (stats.average_latency(), stats.success_rate())
        };

        // Without finished work there is nothing to adapt to.
        let Some(success_rate) = success_rate else {
            return base.min(total);
        };
        let average = average.unwrap_or(Duration::from_millis(1000));

        let size = if average > SLOW_LATENCY || success_rate < 0.9 {
            ((base as f64 * 0.7).floor() as usize).max(MIN_ADAPTIVE_BATCH)
        } else if average < FAST_LATENCY && success_rate > 0.95 {
            ((base as f64 * 1.3).floor() as usize).min(MAX_ADAPTIVE_BATCH)
        } else {
            base
        };

        let size = size.min(total).max(1);
        debug!(
            original_batch_size = base,
            adaptive_batch_size = size,
            average_ms = average.as_millis() as u64,
            success_rate,
            total_items = total,
            "Calculated optimal batch size"
        );
        size
    }

    /// Adjust the concurrency ceiling from recent latency.
    ///
    /// Raises it by 5 (up to 100) when latency is under a second while the
    /// ceiling is saturated, lowers it by 5 (down to 10) when latency is
    /// over ten seconds. Returns the resulting ceiling.
    pub fn optimize_concurrency(&self) -> usize {
        let (average, current) = {
            let stats = self.inner.stats.lock();
            (stats.average_latency(), stats.current_concurrency)
        };

        let mut config = self.inner.config.write();
        let Some(average) = average else {
            return config.max_concurrency;
        };

        if average < TUNE_UP_LATENCY && current == config.max_concurrency {
            config.max_concurrency = (config.max_concurrency + TUNE_STEP).min(MAX_TUNED_CONCURRENCY);
            info!(
                new_max_concurrency = config.max_concurrency,
                "Increased max concurrency for better utilization"
            );
        }

        if average > TUNE_DOWN_LATENCY && config.max_concurrency > MIN_TUNED_CONCURRENCY {
            config.max_concurrency = config
                .max_concurrency
                .saturating_sub(TUNE_STEP)
                .max(MIN_TUNED_CONCURRENCY);
            info!(
                new_max_concurrency = config.max_concurrency,
                "Decreased max concurrency due to high processing times"
            );
        }

        config.max_concurrency
    }

    /// Snapshot of the processing statistics.
    pub fn stats(&self) -> ProcessingStats {
        let (max_concurrency, batch_size) = {
            let config = self.inner.config.read();
            (config.max_concurrency, config.batch_size)
        };
        let circuit_breaker_open = self.inner.breaker.is_open();
        let stats = self.inner.stats.lock();

        ProcessingStats {
            total_processed: stats.total_processed,
            success_count: stats.success_count,
            failure_count: stats.failure_count,
            average_processing_ms: stats
                .average_latency()
                .map(|d| d.as_secs_f64() * 1000.0)
                .unwrap_or(0.0),
            current_concurrency: stats.current_concurrency,
            queue_size: stats.queue_size,
            circuit_breaker_open,
            max_concurrency,
            batch_size,
        }
    }

    /// Zero all counters, the latency window and the breaker.
    pub fn reset_stats(&self) {
        self.inner.stats.lock().reset();
        self.inner.breaker.reset();
        info!("Concurrency coordinator stats reset");
    }

    /// Stop the self-tuning loop.
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.tuner.lock().take() {
            handle.abort();
            info!("Concurrency coordinator self-tuning stopped");
        }
    }

    /// Whether the self-tuning loop is running.
    pub fn is_tuning(&self) -> bool {
        self.inner
            .tuner
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn start_tuning(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available, concurrency self-tuning disabled");
            return;
        };

        let interval = self.inner.config.read().tuning_interval;
        if interval.is_zero() {
            warn!("Tuning interval is zero, concurrency self-tuning disabled");
            return;
        }
        let weak: Weak<CoordinatorInner> = Arc::downgrade(&self.inner);

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let coordinator = ConcurrencyCoordinator { inner };
                let stats = coordinator.stats();
                info!(
                    total_processed = stats.total_processed,
                    success_count = stats.success_count,
                    failure_count = stats.failure_count,
                    average_processing_ms = stats.average_processing_ms,
                    current_concurrency = stats.current_concurrency,
                    circuit_breaker_open = stats.circuit_breaker_open,
                    max_concurrency = stats.max_concurrency,
                    batch_size = stats.batch_size,
                    "Concurrency coordinator stats"
                );
                coordinator.optimize_concurrency();
            }
        });

        *self.inner.tuner.lock() = Some(handle);
    }
}

fn breaker_config(config: &CoordinatorConfig) -> BreakerConfig {
    BreakerConfig {
        threshold: config.circuit_breaker_threshold,
        failure_window: config.failure_window,
        cooldown: config.circuit_breaker_cooldown,
    }
}
