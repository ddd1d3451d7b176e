//! Domain Events
//!
//! Immutable records of significant things the availability core did:
//! bootstraps, rebuilds and detected inconsistencies. They feed the
//! audit log and make the self-healing path observable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain event representing a significant occurrence in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// The cache was populated from a full record store scan.
    BootstrapCompleted {
        events: usize,
        entries: usize,
        reservations: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A single entry was rebuilt from the record store.
    EntryRebuilt {
        key: String,
        reservations: usize,
        timestamp: DateTime<Utc>,
    },

    /// A rebuild could not complete; nothing was published.
    RebuildFailed {
        key: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A write-path propagation failed and a targeted rebuild was queued.
    RebuildScheduled {
        event_id: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The cache view disagreed with a propagated write. Observability only.
    InconsistencyDetected {
        key: String,
        reservation_id: u64,
        detail: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::BootstrapCompleted { .. } => "BootstrapCompleted",
            DomainEvent::EntryRebuilt { .. } => "EntryRebuilt",
            DomainEvent::RebuildFailed { .. } => "RebuildFailed",
            DomainEvent::RebuildScheduled { .. } => "RebuildScheduled",
            DomainEvent::InconsistencyDetected { .. } => "InconsistencyDetected",
        }
    }

    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::BootstrapCompleted { timestamp, .. }
            | DomainEvent::EntryRebuilt { timestamp, .. }
            | DomainEvent::RebuildFailed { timestamp, .. }
            | DomainEvent::RebuildScheduled { timestamp, .. }
            | DomainEvent::InconsistencyDetected { timestamp, .. } => *timestamp,
        }
    }

    /// Storage key of the entry the event is about, if it names one.
    pub fn key(&self) -> Option<&str> {
        match self {
            DomainEvent::EntryRebuilt { key, .. }
            | DomainEvent::RebuildFailed { key, .. }
            | DomainEvent::InconsistencyDetected { key, .. } => Some(key),
            DomainEvent::BootstrapCompleted { .. } | DomainEvent::RebuildScheduled { .. } => None,
        }
    }

    /// Check if this event signals degraded cache health.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            DomainEvent::RebuildFailed { .. }
                | DomainEvent::RebuildScheduled { .. }
                | DomainEvent::InconsistencyDetected { .. }
        )
    }

    // Factory methods

    pub fn entry_rebuilt(key: impl Into<String>, reservations: usize) -> Self {
        DomainEvent::EntryRebuilt {
            key: key.into(),
            reservations,
            timestamp: Utc::now(),
        }
    }

    pub fn rebuild_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        DomainEvent::RebuildFailed {
            key: key.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn rebuild_scheduled(event_id: u64, reason: impl Into<String>) -> Self {
        DomainEvent::RebuildScheduled {
            event_id,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn inconsistency(
        key: impl Into<String>,
        reservation_id: u64,
        detail: impl Into<String>,
    ) -> Self {
        DomainEvent::InconsistencyDetected {
            key: key.into(),
            reservation_id,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}
