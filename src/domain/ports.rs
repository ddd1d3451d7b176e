//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! This module defines the value objects shared by every component and the
//! abstractions (ports) the availability core depends on. Infrastructure
//! adapters implement these traits to provide concrete backends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Availability Core                      │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                   │    │
//! │  │          RecordStore     │     EventPublisher       │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                      │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                   │    │
//! │  │   InMemoryRecordStore │ LoggingEventPublisher       │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::DomainEvent;
use crate::error::{Error, Result};

// =============================================================================
// Identifiers
// =============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Event identifier (value object).
    EventId
);
id_type!(
    /// Seat identifier, 1-based across the whole venue (value object).
    SeatId
);
id_type!(
    /// Reservation identifier assigned by the record store (value object).
    ReservationId
);
id_type!(
    /// Holder of a reservation (value object).
    UserId
);

// =============================================================================
// Rank
// =============================================================================

/// Seat rank. Ordering follows price, most expensive first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    S,
    A,
    B,
    C,
}

impl Rank {
    /// All ranks in catalog order.
    pub const ALL: [Rank; 4] = [Rank::S, Rank::A, Rank::B, Rank::C];

    /// One-letter rank code.
    pub fn code(self) -> &'static str {
        match self {
            Rank::S => "S",
            Rank::A => "A",
            Rank::B => "B",
            Rank::C => "C",
        }
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Rank {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "S" | "s" => Ok(Rank::S),
            "A" | "a" => Ok(Rank::A),
            "B" | "b" => Ok(Rank::B),
            "C" | "c" => Ok(Rank::C),
            other => Err(Error::Config(format!("unknown seat rank '{}'", other))),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A reservation as stored in the record store.
///
/// A reservation is active iff `canceled_at` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub event_id: EventId,
    pub seat_id: SeatId,
    pub user_id: UserId,
    pub reserved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Check whether the reservation still holds its seat.
    pub fn is_active(&self) -> bool {
        self.canceled_at.is_none()
    }
}

/// Insert request for the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub event_id: EventId,
    pub seat_id: SeatId,
    pub user_id: UserId,
}

/// Descriptive event fields as stored in the record store.
///
/// Totals and remaining counts are derived and never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub title: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub price: u64,
}

// =============================================================================
// Record Store Port
// =============================================================================

/// Port for the durable system-of-record.
///
/// The availability core only ever reads from it on bootstrap and on cache
/// misses; writes go through it first and are then propagated to the cache.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Select all events.
    async fn list_events(&self) -> Result<Vec<EventRecord>>;

    /// Select one event.
    async fn get_event(&self, event_id: EventId) -> Result<Option<EventRecord>>;

    /// Select all non-canceled reservations, in write order.
    async fn active_reservations(&self) -> Result<Vec<Reservation>>;

    /// Select non-canceled reservations for one event, in write order.
    async fn active_reservations_for_event(&self, event_id: EventId) -> Result<Vec<Reservation>>;

    /// Insert a reservation. Fails with `SeatTaken` if the seat already
    /// holds an active reservation for the event.
    async fn insert_reservation(&self, new: NewReservation) -> Result<Reservation>;

    /// Mark a reservation canceled by id, returning the updated record.
    async fn cancel_reservation(&self, reservation_id: ReservationId) -> Result<Reservation>;

    /// Check if the record store is reachable.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// Publish multiple events in order, stopping at the first failure.
    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
