//! Availability Cache Subsystem
//!
//! Keeps a derived, queryable view of active reservations in step with the
//! record store and serves it without touching the store on the hot path.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        Availability Cache                            │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ShardedMap<(event, rank), Arc<KeySlot>>                             │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────┐                  │
//! │  │ 7-S  Ready   │ │ 7-A  Loading │ │ 9-C  Ready   │   one lock/key   │
//! │  └──────────────┘ └──────────────┘ └──────────────┘                  │
//! │         ▲ append / remove by id          │ rebuild on miss           │
//! │         │                                ▼                           │
//! │   booking workflow               Record Store (authoritative)        │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Projector: capacity(rank) - |entry(event, rank)|   (pure)           │
//! │  Event Metadata Cache: TTL-bounded event records                     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Consistency
//!
//! Each process owns its cache. Within a process, writes to one key are
//! applied in the order the record store accepted them and are idempotent
//! by reservation id. Across processes the view is eventually consistent:
//! a process that missed a propagation heals on its next rebuild.

mod cache;
mod entry;
mod metrics;
mod shard;
pub mod metadata;
pub mod projector;

#[cfg(test)]
mod proptest;

pub use cache::{AvailabilityCache, BootstrapReport, CacheConfig, EventSnapshot, WriteOutcome};
pub use entry::{EntryKey, KEY_PREFIX};
pub use metadata::{EventMetadataCache, MetadataStats, DEFAULT_METADATA_TTL};
pub use metrics::MetricsSnapshot;
pub use projector::{project, remaining, Availability, RankAvailability};
pub use shard::{ShardedMap, ShardedMapStats, DEFAULT_SHARD_COUNT};
