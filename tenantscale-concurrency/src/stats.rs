//! Processing statistics.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of latency samples kept for the rolling average.
const LATENCY_WINDOW: usize = 100;

/// Snapshot of coordinator counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    /// Items handed to the coordinator across all runs.
    pub total_processed: u64,
    /// Units of work that eventually succeeded.
    pub success_count: u64,
    /// Units of work that failed after every retry.
    pub failure_count: u64,
    /// Rolling average latency of recent attempts, in milliseconds.
    pub average_processing_ms: f64,
    /// Units of work in flight right now.
    pub current_concurrency: usize,
    /// Items of the current run not yet finished.
    pub queue_size: usize,
    /// Whether the circuit breaker is open.
    pub circuit_breaker_open: bool,
    /// Configured concurrency ceiling.
    pub max_concurrency: usize,
    /// Configured default batch size.
    pub batch_size: usize,
}

impl ProcessingStats {
    /// Success rate over finished units of work, or `None` before any finished.
    pub fn success_rate(&self) -> Option<f64> {
        let finished = self.success_count + self.failure_count;
        if finished == 0 {
            None
        } else {
            Some(self.success_count as f64 / finished as f64)
        }
    }
}

/// Mutable counters behind the coordinator's lock.
#[derive(Debug, Default)]
pub(crate) struct StatsState {
    pub total_processed: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub current_concurrency: usize,
    pub queue_size: usize,
    latencies: VecDeque<Duration>,
    latency_sum: Duration,
}

impl StatsState {
    pub fn record_latency(&mut self, latency: Duration) {
        self.latencies.push_back(latency);
        self.latency_sum += latency;
        if self.latencies.len() > LATENCY_WINDOW
            && let Some(oldest) = self.latencies.pop_front()
        {
            self.latency_sum -= oldest;
        }
    }

    /// Mean of the retained latency samples.
    pub fn average_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            None
        } else {
            Some(self.latency_sum / self.latencies.len() as u32)
        }
    }

    pub fn success_rate(&self) -> Option<f64> {
        let finished = self.success_count + self.failure_count;
        (finished > 0).then(|| self.success_count as f64 / finished as f64)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
