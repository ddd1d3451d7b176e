//! Cache Metrics Collection
//!
//! Lock-free counters describing cache health: hit ratio, rebuild activity
//! and how often the self-healing path had to kick in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Read path
    hits: AtomicU64,
    misses: AtomicU64,

    // Rebuilds
    bootstraps: AtomicU64,
    rebuilds: AtomicU64,
    rebuild_failures: AtomicU64,
    last_rebuild_latency_us: AtomicU64,

    // Write path
    appends: AtomicU64,
    removals: AtomicU64,
    duplicate_writes: AtomicU64,
    buffered_writes: AtomicU64,
    deferred_writes: AtomicU64,
    inconsistencies: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bootstrap(&self) {
        self.bootstraps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebuild(&self, latency: Duration) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        self.last_rebuild_latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_rebuild_failure(&self) {
        self.rebuild_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_append(&self) {
        self.appends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_buffered(&self) {
        self.buffered_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.deferred_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inconsistency(&self) {
        self.inconsistencies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.misses.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
            bootstraps: self.bootstraps.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            rebuild_failures: self.rebuild_failures.load(Ordering::Relaxed),
            last_rebuild_latency: Duration::from_micros(
                self.last_rebuild_latency_us.load(Ordering::Relaxed),
            ),
            appends: self.appends.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            duplicate_writes: self.duplicate_writes.load(Ordering::Relaxed),
            buffered_writes: self.buffered_writes.load(Ordering::Relaxed),
            deferred_writes: self.deferred_writes.load(Ordering::Relaxed),
            inconsistencies: self.inconsistencies.load(Ordering::Relaxed),
            entries: 0,
        }
    }
}

/// Snapshot of cache metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub bootstraps: u64,
    pub rebuilds: u64,
    pub rebuild_failures: u64,
    pub last_rebuild_latency: Duration,
    pub appends: u64,
    pub removals: u64,
    pub duplicate_writes: u64,
    pub buffered_writes: u64,
    pub deferred_writes: u64,
    pub inconsistencies: u64,
    /// Keys currently held by the cache
    pub entries: usize,
}
