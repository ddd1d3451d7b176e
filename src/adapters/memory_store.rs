//! In-Memory Record Store Adapter
//!
//! Implements the `RecordStore` port with process-local tables. Enforces the
//! same constraints a relational store would (one active reservation per
//! `(event, seat)`, known events and seats) and supports fault injection so
//! timeout and outage paths can be exercised without a database.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::catalog::SeatCatalog;
use crate::domain::ports::{
    EventId, EventRecord, NewReservation, RecordStore, Reservation, ReservationId, SeatId, UserId,
};
use crate::error::{Error, Result};

/// Seed file contents
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub events: Vec<EventRecord>,
    pub reservations: Vec<SeedReservation>,
}

/// A reservation row in a seed file
#[derive(Debug, Clone, Deserialize)]
pub struct SeedReservation {
    pub event_id: EventId,
    pub seat_id: SeatId,
    pub user_id: UserId,
    #[serde(default)]
    pub canceled: bool,
}

#[derive(Debug, Default)]
struct Tables {
    events: BTreeMap<EventId, EventRecord>,
    /// All reservations in write order
    reservations: Vec<Reservation>,
    /// Row index by reservation id
    by_id: HashMap<ReservationId, usize>,
    /// Unique index over active reservations
    active: HashMap<(EventId, SeatId), ReservationId>,
    next_id: u64,
}

/// Process-local record store.
pub struct InMemoryRecordStore {
    catalog: Arc<SeatCatalog>,
    tables: RwLock<Tables>,
    available: AtomicBool,
    latency_us: AtomicU64,
}

impl InMemoryRecordStore {
    /// Create an empty store validating seats against `catalog`.
    pub fn new(catalog: Arc<SeatCatalog>) -> Self {
        Self {
            catalog,
            tables: RwLock::new(Tables {
                next_id: 1,
                ..Tables::default()
            }),
            available: AtomicBool::new(true),
            latency_us: AtomicU64::new(0),
        }
    }

    /// Create a store populated from a YAML seed file.
    pub fn from_seed_file(catalog: Arc<SeatCatalog>, path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let seed: Seed = serde_yaml::from_str(&content)?;
        let store = Self::new(catalog);
        store.load_seed(seed)?;
        info!(
            path = %path.as_ref().display(),
            events = store.event_count(),
            reservations = store.reservation_count(),
            "Loaded record store seed"
        );
        Ok(store)
    }

    /// Insert seed rows, enforcing the same constraints as live writes.
    pub fn load_seed(&self, seed: Seed) -> Result<()> {
        let mut tables = self.tables.write();
        for event in seed.events {
            tables.events.insert(event.id, event);
        }
        for row in seed.reservations {
            let reservation = Self::insert_row(
                &self.catalog,
                &mut tables,
                NewReservation {
                    event_id: row.event_id,
                    seat_id: row.seat_id,
                    user_id: row.user_id,
                },
                true,
            )?;
            if row.canceled {
                Self::cancel_row(&mut tables, reservation.id)?;
            }
        }
        Ok(())
    }

    /// Insert or replace an event row.
    pub fn put_event(&self, event: EventRecord) {
        self.tables.write().events.insert(event.id, event);
    }

    /// Simulate an outage: while unavailable every query fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every query by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_us
            .store(latency.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn event_count(&self) -> usize {
        self.tables.read().events.len()
    }

    /// Number of reservation rows, canceled ones included.
    pub fn reservation_count(&self) -> usize {
        self.tables.read().reservations.len()
    }

    async fn round_trip(&self) -> Result<()> {
        let latency = Duration::from_micros(self.latency_us.load(Ordering::SeqCst));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::BackingStore("record store unavailable".to_string()));
        }
        Ok(())
    }

    fn insert_row(
        catalog: &SeatCatalog,
        tables: &mut Tables,
        new: NewReservation,
        allow_closed: bool,
    ) -> Result<Reservation> {
        let event = tables
            .events
            .get(&new.event_id)
            .ok_or(Error::EventNotFound(new.event_id.get()))?;
        if event.closed && !allow_closed {
            return Err(Error::EventClosed(new.event_id.get()));
        }
        catalog.seat(new.seat_id)?;
        if tables.active.contains_key(&(new.event_id, new.seat_id)) {
            return Err(Error::SeatTaken {
                event_id: new.event_id.get(),
                seat_id: new.seat_id.get(),
            });
        }

        let id = ReservationId(tables.next_id);
        tables.next_id += 1;
        let reservation = Reservation {
            id,
            event_id: new.event_id,
            seat_id: new.seat_id,
            user_id: new.user_id,
            reserved_at: Utc::now(),
            canceled_at: None,
        };
        tables.active.insert((new.event_id, new.seat_id), id);
        tables.by_id.insert(id, tables.reservations.len());
        tables.reservations.push(reservation.clone());
        Ok(reservation)
    }

    fn cancel_row(tables: &mut Tables, id: ReservationId) -> Result<Reservation> {
        let idx = *tables
            .by_id
            .get(&id)
            .ok_or(Error::ReservationNotFound(id.get()))?;
        let row = &mut tables.reservations[idx];
        if !row.is_active() {
            return Err(Error::ReservationNotFound(id.get()));
        }
        row.canceled_at = Some(Utc::now());
        let canceled = row.clone();
        tables.active.remove(&(canceled.event_id, canceled.seat_id));
        Ok(canceled)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn list_events(&self) -> Result<Vec<EventRecord>> {
        self.round_trip().await?;
        Ok(self.tables.read().events.values().cloned().collect())
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<EventRecord>> {
        self.round_trip().await?;
        Ok(self.tables.read().events.get(&event_id).cloned())
    }

    async fn active_reservations(&self) -> Result<Vec<Reservation>> {
        self.round_trip().await?;
        Ok(self
            .tables
            .read()
            .reservations
            .iter()
            .filter(|r| r.is_active())
            .cloned()
            .collect())
    }

    async fn active_reservations_for_event(&self, event_id: EventId) -> Result<Vec<Reservation>> {
        self.round_trip().await?;
        Ok(self
            .tables
            .read()
            .reservations
            .iter()
            .filter(|r| r.event_id == event_id && r.is_active())
            .cloned()
            .collect())
    }

    #[instrument(skip(self), fields(event_id = %new.event_id, seat_id = %new.seat_id))]
    async fn insert_reservation(&self, new: NewReservation) -> Result<Reservation> {
        self.round_trip().await?;
        let reservation = Self::insert_row(&self.catalog, &mut self.tables.write(), new, false)?;
        debug!(reservation_id = %reservation.id, "Inserted reservation");
        Ok(reservation)
    }

    #[instrument(skip(self), fields(reservation_id = %reservation_id))]
    async fn cancel_reservation(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.round_trip().await?;
        let canceled = Self::cancel_row(&mut self.tables.write(), reservation_id)?;
        debug!(event_id = %canceled.event_id, "Canceled reservation");
        Ok(canceled)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.round_trip().await.is_ok())
    }
}

// =============================================================================
// Tests
// =============================================================================
