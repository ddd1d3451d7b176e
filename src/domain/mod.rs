//! Domain Layer
//!
//! Value objects, ports and events shared by the availability core.
//!
//! - **Ports** (`ports.rs`) - identifiers, records and the `RecordStore` /
//!   `EventPublisher` abstractions
//! - **Events** (`events.rs`) - domain events for audit and observability

pub mod events;
pub mod ports;

pub use events::DomainEvent;
pub use ports::{
    EventId, EventPublisher, EventRecord, NewReservation, Rank, RecordStore, Reservation,
    ReservationId, SeatId, UserId,
};
