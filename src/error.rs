//! Error types for the seat availability tracker

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the availability tracker
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Not Found
    // =========================================================================
    /// Seat identifier unknown to the seat catalog
    #[error("Seat not found: {0}")]
    SeatNotFound(u64),

    /// Event absent from the record store
    #[error("Event not found: {0}")]
    EventNotFound(u64),

    /// Reservation absent from the record store
    #[error("Reservation not found: {0}")]
    ReservationNotFound(u64),

    // =========================================================================
    // Record Store
    // =========================================================================
    /// Record store unreachable or a query failed
    #[error("Record store error: {0}")]
    BackingStore(String),

    /// Record store query did not complete within the configured bound
    #[error("Record store {operation} timed out after {duration:?}")]
    Timeout {
        operation: &'static str,
        duration: Duration,
    },

    /// The seat already holds an active reservation for the event
    #[error("Seat {seat_id} already reserved for event {event_id}")]
    SeatTaken { event_id: u64, seat_id: u64 },

    /// The event no longer accepts reservations
    #[error("Event {0} is closed")]
    EventClosed(u64),

    /// Every seat of the rank is taken
    #[error("Rank {rank} of event {event_id} is sold out")]
    SoldOut { event_id: u64, rank: String },

    // =========================================================================
    // Cache
    // =========================================================================
    /// The cache view disagrees with an invariant it must hold
    #[error("Cache inconsistency for {key}: {reason}")]
    Inconsistency { key: String, reason: String },

    // =========================================================================
    // Configuration / IO
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the recoverable "absent" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::SeatNotFound(_) | Error::EventNotFound(_) | Error::ReservationNotFound(_)
        )
    }

    /// True when retrying the same read may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::BackingStore(_) | Error::Timeout { .. })
    }
}
