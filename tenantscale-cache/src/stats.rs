//! Cache statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_operations: u64,
    /// Hits as a percentage of reads.
    pub hit_rate: f64,
    /// Shared tier memory usage, when reachable.
    pub memory_usage: Option<String>,
    /// Shared tier key count, or local entries when the shared tier is unreachable.
    pub key_count: u64,
    pub local_entries: usize,
    pub shared_connected: bool,
}

/// Result of [`crate::TieredCache::health_check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheHealth {
    /// Shared tier answered a ping.
    pub shared: bool,
    /// The local tier is always available.
    pub fallback: bool,
    /// Ping round trip in milliseconds.
    pub latency_ms: Option<u64>,
}

/// Hit/miss counters.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.hits.load(Ordering::Relaxed) + self.misses.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Counter fields of a snapshot; tier fields are left at their defaults.
    pub fn snapshot(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_operations = hits + misses;

        CacheStats {
            hits,
            misses,
            total_operations,
            hit_rate: if total_operations > 0 {
                hits as f64 / total_operations as f64 * 100.0
            } else {
                0.0
            },
            ..Default::default()
        }
    }
}
