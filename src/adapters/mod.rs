//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                             │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                    Ports (Traits)                         │  │
//! │  │           RecordStore      │      EventPublisher          │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                      │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │ InMemoryRecordStore │ LoggingEventPublisher               │  │
//! │  │ InMemoryEventCollector                                    │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use seatkeeper::adapters::InMemoryRecordStore;
//! use seatkeeper::catalog::SeatCatalog;
//! use seatkeeper::domain::RecordStore;
//!
//! let store = InMemoryRecordStore::new(Arc::new(SeatCatalog::default()));
//! let events = store.list_events().await?;
//! ```

mod event_publisher;
mod memory_store;

pub use event_publisher::{InMemoryEventCollector, LoggingEventPublisher};
pub use memory_store::{InMemoryRecordStore, Seed, SeedReservation};
