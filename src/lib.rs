//! Seatkeeper - Seat Availability Tracker
//!
//! Answers, for an event and optionally a seat rank, how many seats remain
//! and which reservations are active, while reservations are created and
//! canceled concurrently against a durable record store.
//!
//! # Architecture
//!
//! ```text
//! write:  Record Store (authoritative) ──propagate──▶ Availability Cache
//! read:   Availability Cache + Seat Catalog ──▶ Projector ──▶ remaining seats
//! miss:   Availability Cache ──scoped rebuild──▶ Record Store
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Record store and event publisher implementations
//! - [`availability`] - Availability cache, projector and metadata cache
//! - [`catalog`] - Static seat catalog
//! - [`config`] - Service configuration
//! - [`domain`] - Domain layer with ports and events (DDD)
//! - [`error`] - Error types
//! - [`service`] - Query and propagation interface for request handlers
//! - [`telemetry`] - Prometheus exposition

pub mod adapters;
pub mod availability;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use availability::{AvailabilityCache, CacheConfig, EventMetadataCache};
pub use catalog::SeatCatalog;
pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use service::{AvailabilityService, EventDetail, EventSummary, SeatView};
