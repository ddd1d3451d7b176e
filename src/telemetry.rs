//! Prometheus Exposition
//!
//! Mirrors cache statistics into a Prometheus registry served on `/metrics`.
//! Counters follow the cache's own atomics: each refresh adds the delta since
//! the previous one, so they stay monotonic.

use once_cell::sync::Lazy;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

use crate::availability::{MetadataStats, MetricsSnapshot};
use crate::error::{Error, Result};

struct CounterSpec {
    name: &'static str,
    help: &'static str,
    read: fn(&MetricsSnapshot) -> u64,
}

static COUNTERS: Lazy<Vec<CounterSpec>> = Lazy::new(|| {
    vec![
        CounterSpec {
            name: "seatkeeper_cache_hits_total",
            help: "Reads served from a ready cache entry",
            read: |s| s.hits,
        },
        CounterSpec {
            name: "seatkeeper_cache_misses_total",
            help: "Reads that had to rebuild an entry",
            read: |s| s.misses,
        },
        CounterSpec {
            name: "seatkeeper_bootstraps_total",
            help: "Completed full bootstraps",
            read: |s| s.bootstraps,
        },
        CounterSpec {
            name: "seatkeeper_rebuilds_total",
            help: "Entries rebuilt from the record store",
            read: |s| s.rebuilds,
        },
        CounterSpec {
            name: "seatkeeper_rebuild_failures_total",
            help: "Rebuilds that failed or timed out",
            read: |s| s.rebuild_failures,
        },
        CounterSpec {
            name: "seatkeeper_appends_total",
            help: "Reservations appended by propagation",
            read: |s| s.appends,
        },
        CounterSpec {
            name: "seatkeeper_removals_total",
            help: "Reservations removed by propagation",
            read: |s| s.removals,
        },
        CounterSpec {
            name: "seatkeeper_duplicate_writes_total",
            help: "Duplicate or late propagations ignored",
            read: |s| s.duplicate_writes,
        },
        CounterSpec {
            name: "seatkeeper_buffered_writes_total",
            help: "Propagations buffered behind a loading entry",
            read: |s| s.buffered_writes,
        },
        CounterSpec {
            name: "seatkeeper_deferred_writes_total",
            help: "Propagations for uncached keys left to the next rebuild",
            read: |s| s.deferred_writes,
        },
        CounterSpec {
            name: "seatkeeper_inconsistencies_total",
            help: "Detected divergences between cache and record store",
            read: |s| s.inconsistencies,
        },
    ]
});

fn metrics_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registry: {}", e))
}

/// Registry of the service's Prometheus metrics.
pub struct Telemetry {
    registry: Registry,
    counters: Vec<(fn(&MetricsSnapshot) -> u64, IntCounter)>,
    entries: IntGauge,
    hit_ratio: Gauge,
    last_rebuild_seconds: Gauge,
    metadata_events: IntGauge,
    ready: IntGauge,
}

impl Telemetry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let counters = COUNTERS
            .iter()
            .map(|spec| {
                let counter = IntCounter::new(spec.name, spec.help).map_err(metrics_err)?;
                registry
                    .register(Box::new(counter.clone()))
                    .map_err(metrics_err)?;
                Ok((spec.read, counter))
            })
            .collect::<Result<Vec<_>>>()?;

        let entries = IntGauge::new("seatkeeper_cache_entries", "Keys held by the cache")
            .map_err(metrics_err)?;
        let hit_ratio = Gauge::new("seatkeeper_cache_hit_ratio", "Hits over all reads")
            .map_err(metrics_err)?;
        let last_rebuild_seconds = Gauge::new(
            "seatkeeper_last_rebuild_seconds",
            "Latency of the most recent rebuild",
        )
        .map_err(metrics_err)?;
        let metadata_events = IntGauge::new(
            "seatkeeper_metadata_cached_events",
            "Events held by the metadata cache",
        )
        .map_err(metrics_err)?;
        let ready = IntGauge::new("seatkeeper_ready", "1 once bootstrap succeeded")
            .map_err(metrics_err)?;

        registry
            .register(Box::new(entries.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(hit_ratio.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(last_rebuild_seconds.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(metadata_events.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(ready.clone()))
            .map_err(metrics_err)?;

        Ok(Self {
            registry,
            counters,
            entries,
            hit_ratio,
            last_rebuild_seconds,
            metadata_events,
            ready,
        })
    }

    /// Refresh every metric from the latest statistics.
    pub fn update(&self, cache: &MetricsSnapshot, metadata: &MetadataStats, ready: bool) {
        for (read, counter) in &self.counters {
            let value = read(cache);
            let current = counter.get();
            if value > current {
                counter.inc_by(value - current);
            }
        }
        self.entries.set(cache.entries as i64);
        self.hit_ratio.set(cache.hit_ratio);
        self.last_rebuild_seconds
            .set(cache.last_rebuild_latency.as_secs_f64());
        self.metadata_events.set(metadata.cached_events as i64);
        self.ready.set(i64::from(ready));
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
