//! Availability Service
//!
//! The interface request handlers use. Reads are answered from the caches
//! and the seat catalog only. Writes go to the record store first, which is
//! authoritative, and are then propagated into the availability cache.
//!
//! A propagation that fails never fails the booking or cancellation: the
//! error is logged and a targeted rebuild of the event runs in the
//! background. A read whose rebuild fails is surfaced to the caller instead,
//! since a wrong seat count would permit overbooking.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::availability::{
    project, remaining, Availability, AvailabilityCache, BootstrapReport, EventMetadataCache,
    EventSnapshot, MetadataStats, MetricsSnapshot, RankAvailability, WriteOutcome,
};
use crate::catalog::SeatCatalog;
use crate::domain::{
    DomainEvent, EventId, EventPublisher, EventRecord, NewReservation, Rank, RecordStore,
    Reservation, ReservationId, SeatId, UserId,
};
use crate::error::{Error, Result};

// =============================================================================
// Read Models
// =============================================================================

/// An event with its derived availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub id: EventId,
    pub title: String,
    pub public: bool,
    pub closed: bool,
    pub price: u64,
    pub total: usize,
    pub remains: usize,
    pub ranks: BTreeMap<Rank, RankAvailability>,
}

impl EventSummary {
    fn new(record: EventRecord, availability: Availability) -> Self {
        Self {
            id: record.id,
            title: record.title,
            public: record.public,
            closed: record.closed,
            price: record.price,
            total: availability.total,
            remains: availability.remains,
            ranks: availability.ranks,
        }
    }

    /// Copy for anonymous viewers, without base price and flags.
    pub fn sanitized(&self) -> Self {
        Self {
            price: 0,
            public: false,
            closed: false,
            ..self.clone()
        }
    }
}

/// One seat in an event's seat map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatView {
    pub num: u32,
    pub reserved: bool,
    /// Held by the viewer
    pub mine: bool,
    /// Unix seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<i64>,
}

/// An event with its full seat map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventDetail {
    #[serde(flatten)]
    pub summary: EventSummary,
    pub seats: BTreeMap<Rank, Vec<SeatView>>,
}

// =============================================================================
// Service
// =============================================================================

/// Availability query and propagation interface.
pub struct AvailabilityService {
    cache: Arc<AvailabilityCache>,
    metadata: Arc<EventMetadataCache>,
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn EventPublisher>,
    rebuilds: TaskTracker,
    ready: AtomicBool,
}

impl AvailabilityService {
    pub fn new(
        cache: Arc<AvailabilityCache>,
        metadata: Arc<EventMetadataCache>,
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            cache,
            metadata,
            store,
            publisher,
            rebuilds: TaskTracker::new(),
            ready: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &Arc<AvailabilityCache> {
        &self.cache
    }

    pub fn metadata(&self) -> &Arc<EventMetadataCache> {
        &self.metadata
    }

    fn catalog(&self) -> &SeatCatalog {
        self.cache.catalog()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Populate both caches. The service reports ready only afterwards.
    ///
    /// A failure here is fatal: no traffic should be served from an
    /// unpopulated cache.
    pub async fn bootstrap(&self) -> Result<BootstrapReport> {
        let report = self.cache.bootstrap().await?;
        let events = self.metadata.list().await?;
        debug!(events = events.len(), "Event metadata warmed");
        self.ready.store(true, Ordering::SeqCst);
        Ok(report)
    }

    /// True once bootstrap succeeded.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Check if the record store answers within the store timeout.
    pub async fn health_check(&self) -> bool {
        let limit = self.cache.config().store_timeout;
        matches!(
            tokio::time::timeout(limit, self.store.health_check()).await,
            Ok(Ok(true))
        )
    }

    /// Wait for background rebuilds scheduled so far.
    pub async fn wait_for_rebuilds(&self) {
        self.rebuilds.close();
        self.rebuilds.wait().await;
        self.rebuilds.reopen();
    }

    /// Stop accepting rebuilds and wait for those in flight.
    pub async fn shutdown(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.rebuilds.close();
        self.rebuilds.wait().await;
        info!("Availability service stopped");
    }

    pub fn stats(&self) -> MetricsSnapshot {
        self.cache.stats()
    }

    pub fn metadata_stats(&self) -> MetadataStats {
        self.metadata.stats()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Active reservations of an event, or of one rank of it.
    pub async fn list_active_reservations(
        &self,
        event_id: EventId,
        rank: Option<Rank>,
    ) -> Result<Vec<Reservation>> {
        self.cache.list(event_id, rank).await
    }

    /// Remaining seats of an event, or of one rank of it.
    pub async fn remaining_seats(&self, event_id: EventId, rank: Option<Rank>) -> Result<usize> {
        match rank {
            Some(rank) => {
                let reservations = self.cache.list(event_id, Some(rank)).await?;
                let snapshot = EventSnapshot {
                    event_id,
                    entries: BTreeMap::from([(rank, reservations)]),
                };
                remaining(self.catalog(), &snapshot, rank)
            }
            None => {
                let snapshot = self.cache.snapshot(event_id).await?;
                Ok(project(self.catalog(), &snapshot, 0)?.remains)
            }
        }
    }

    /// Events sorted by id with their availability.
    ///
    /// Private events are included only when `include_private` is set.
    #[instrument(skip(self))]
    pub async fn list_events(&self, include_private: bool) -> Result<Vec<EventSummary>> {
        let records = self.metadata.list().await?;
        try_join_all(
            records
                .into_iter()
                .filter(|record| include_private || record.public)
                .map(|record| self.summarize(record)),
        )
        .await
    }

    /// One event with its seat map as seen by `viewer`.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn event_detail(
        &self,
        event_id: EventId,
        viewer: Option<UserId>,
    ) -> Result<EventDetail> {
        let record = self.metadata.get(event_id).await?;
        let snapshot = self.cache.snapshot(event_id).await?;
        let catalog = self.catalog();
        let availability = project(catalog, &snapshot, record.price)?;

        let held: HashMap<SeatId, &Reservation> =
            snapshot.reservations().map(|r| (r.seat_id, r)).collect();
        let seats = catalog
            .ranks()
            .map(|rank| {
                let views = catalog
                    .seats_in(rank)
                    .iter()
                    .map(|seat| {
                        let holder = held.get(&seat.id);
                        SeatView {
                            num: seat.num,
                            reserved: holder.is_some(),
                            mine: matches!((holder, viewer), (Some(r), Some(v)) if r.user_id == v),
                            reserved_at: holder.map(|r| r.reserved_at.timestamp()),
                        }
                    })
                    .collect();
                (rank, views)
            })
            .collect();

        Ok(EventDetail {
            summary: EventSummary::new(record, availability),
            seats,
        })
    }

    async fn summarize(&self, record: EventRecord) -> Result<EventSummary> {
        let snapshot = self.cache.snapshot(record.id).await?;
        let availability = project(self.catalog(), &snapshot, record.price)?;
        Ok(EventSummary::new(record, availability))
    }

    // =========================================================================
    // Propagation
    // =========================================================================

    /// Propagate a reservation the record store just accepted.
    ///
    /// Returns `None` when the cache rejected it; the error is logged and,
    /// unless the seat is unknown, a rebuild of the event is scheduled.
    pub async fn on_reservation_created(
        &self,
        event_id: EventId,
        reservation: Reservation,
    ) -> Option<WriteOutcome> {
        let reservation_id = reservation.id;
        match self.cache.record_created(event_id, reservation).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                self.propagation_failed(event_id, reservation_id, e).await;
                None
            }
        }
    }

    /// Propagate a cancel the record store just accepted.
    pub async fn on_reservation_canceled(
        &self,
        event_id: EventId,
        reservation_id: ReservationId,
        rank: Option<Rank>,
    ) -> Option<WriteOutcome> {
        match self
            .cache
            .record_canceled(event_id, reservation_id, rank)
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                self.propagation_failed(event_id, reservation_id, e).await;
                None
            }
        }
    }

    async fn propagation_failed(&self, event_id: EventId, reservation_id: ReservationId, e: Error) {
        if e.is_not_found() {
            warn!(
                event_id = %event_id,
                reservation_id = %reservation_id,
                error = %e,
                "Propagation rejected, reservation not cached"
            );
            return;
        }
        warn!(
            event_id = %event_id,
            reservation_id = %reservation_id,
            error = %e,
            "Propagation failed, scheduling rebuild"
        );
        self.schedule_rebuild(event_id, e.to_string()).await;
    }

    /// Rebuild every rank of an event in the background.
    pub async fn schedule_rebuild(&self, event_id: EventId, reason: String) {
        self.emit(DomainEvent::rebuild_scheduled(event_id.get(), reason))
            .await;

        let cache = Arc::clone(&self.cache);
        self.rebuilds.spawn(async move {
            match cache.rebuild(event_id).await {
                Ok(snapshot) => info!(
                    event_id = %event_id,
                    reservations = snapshot.total(),
                    "Background rebuild complete"
                ),
                // Keys stay absent; the next read retries.
                Err(e) => warn!(event_id = %event_id, error = %e, "Background rebuild failed"),
            }
        });
    }

    // =========================================================================
    // Workflow
    // =========================================================================

    /// Reserve a specific seat.
    ///
    /// Record store rejections (taken seat, closed or unknown event) are
    /// returned; a cache hiccup afterwards is not. A closed or unknown event
    /// also drops the cached metadata, which evidently lags the store.
    #[instrument(skip(self), fields(event_id = %event_id, seat_id = %seat_id))]
    pub async fn reserve(
        &self,
        event_id: EventId,
        seat_id: SeatId,
        user_id: UserId,
    ) -> Result<Reservation> {
        let reservation = self
            .store_write(
                event_id,
                "insert reservation",
                self.store.insert_reservation(NewReservation {
                    event_id,
                    seat_id,
                    user_id,
                }),
            )
            .await
            .inspect_err(|e| {
                if matches!(e, Error::EventClosed(_) | Error::EventNotFound(_)) {
                    debug!(event_id = %event_id, error = %e, "Dropping stale event metadata");
                    self.metadata.invalidate(event_id);
                }
            })?;
        self.on_reservation_created(event_id, reservation.clone())
            .await;
        Ok(reservation)
    }

    /// Reserve the lowest-numbered free seat of a rank.
    pub async fn reserve_in_rank(
        &self,
        event_id: EventId,
        rank: Rank,
        user_id: UserId,
    ) -> Result<Reservation> {
        let taken: HashSet<SeatId> = self
            .cache
            .list(event_id, Some(rank))
            .await?
            .into_iter()
            .map(|r| r.seat_id)
            .collect();

        for seat in self
            .catalog()
            .seats_in(rank)
            .iter()
            .filter(|seat| !taken.contains(&seat.id))
        {
            match self.reserve(event_id, seat.id, user_id).await {
                Err(Error::SeatTaken { .. }) => {
                    debug!(seat_id = %seat.id, "Seat taken concurrently, trying next");
                }
                result => return result,
            }
        }

        Err(Error::SoldOut {
            event_id: event_id.get(),
            rank: rank.to_string(),
        })
    }

    /// Cancel a reservation of an event.
    #[instrument(skip(self), fields(event_id = %event_id, reservation_id = %reservation_id))]
    pub async fn cancel(
        &self,
        event_id: EventId,
        reservation_id: ReservationId,
    ) -> Result<Reservation> {
        let held = self
            .cache
            .list(event_id, None)
            .await?
            .into_iter()
            .find(|r| r.id == reservation_id)
            .ok_or(Error::ReservationNotFound(reservation_id.get()))?;
        let rank = self.catalog().rank_of(held.seat_id)?;

        let canceled = self
            .store_write(
                event_id,
                "cancel reservation",
                self.store.cancel_reservation(reservation_id),
            )
            .await?;
        self.on_reservation_canceled(event_id, reservation_id, Some(rank))
            .await;
        Ok(canceled)
    }

    /// Run a record store write under the store timeout.
    ///
    /// A timed out write may still have been applied, so the event is
    /// rebuilt.
    async fn store_write<T>(
        &self,
        event_id: EventId,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = self.cache.config().store_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                let e = Error::Timeout {
                    operation,
                    duration: limit,
                };
                self.schedule_rebuild(event_id, e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.publisher.publish(event).await {
            warn!(error = %e, "Failed to publish domain event");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEventCollector, InMemoryRecordStore};
    use crate::availability::CacheConfig;
    use crate::catalog::RankLayout;
    use assert_matches::assert_matches;
    use std::time::Duration;

    struct Harness {
        store: Arc<InMemoryRecordStore>,
        events: Arc<InMemoryEventCollector>,
        service: AvailabilityService,
    }

    fn event(id: u64, public: bool) -> EventRecord {
        EventRecord {
            id: EventId(id),
            title: format!("event {}", id),
            public,
            closed: false,
            price: 1000,
        }
    }

    fn harness_with(catalog: SeatCatalog) -> Harness {
        let catalog = Arc::new(catalog);
        let store = Arc::new(InMemoryRecordStore::new(Arc::clone(&catalog)));
        store.put_event(event(1, true));
        store.put_event(event(2, false));
        let events = Arc::new(InMemoryEventCollector::new());

        let cache = Arc::new(AvailabilityCache::new(
            CacheConfig::default(),
            catalog,
            store.clone() as Arc<dyn RecordStore>,
            events.clone() as Arc<dyn EventPublisher>,
        ));
        let metadata = Arc::new(EventMetadataCache::new(
            store.clone() as Arc<dyn RecordStore>,
            Duration::from_secs(60),
            Duration::from_secs(1),
        ));
        let service = AvailabilityService::new(
            cache,
            metadata,
            store.clone() as Arc<dyn RecordStore>,
            events.clone() as Arc<dyn EventPublisher>,
        );
        Harness {
            store,
            events,
            service,
        }
    }

    fn harness() -> Harness {
        harness_with(SeatCatalog::default())
    }

    #[tokio::test]
    async fn test_bootstrap_marks_ready() {
        let h = harness();
        assert!(!h.service.is_ready());
        h.service.bootstrap().await.unwrap();
        assert!(h.service.is_ready());
        assert!(h.service.health_check().await);
        assert!(h.service.metadata_stats().listing_cached);
    }

    #[tokio::test]
    async fn test_reserve_updates_remaining() {
        let h = harness();
        h.service.bootstrap().await.unwrap();

        h.service
            .reserve(EventId(1), SeatId(1), UserId(5))
            .await
            .unwrap();
        h.service
            .reserve(EventId(1), SeatId(300), UserId(5))
            .await
            .unwrap();

        assert_eq!(h.service.remaining_seats(EventId(1), None).await.unwrap(), 998);
        assert_eq!(
            h.service
                .remaining_seats(EventId(1), Some(Rank::S))
                .await
                .unwrap(),
            49
        );
        assert_eq!(h.service.stats().appends, 2);
    }

    #[tokio::test]
    async fn test_store_rejection_surfaces() {
        let h = harness();
        h.service.bootstrap().await.unwrap();
        h.service
            .reserve(EventId(1), SeatId(7), UserId(1))
            .await
            .unwrap();

        assert_matches!(
            h.service.reserve(EventId(1), SeatId(7), UserId(2)).await,
            Err(Error::SeatTaken { .. })
        );
        assert_matches!(
            h.service.reserve(EventId(9), SeatId(7), UserId(2)).await,
            Err(Error::EventNotFound(9))
        );
        assert_eq!(
            h.service
                .list_active_reservations(EventId(1), Some(Rank::S))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_reserve_in_rank_until_sold_out() {
        let catalog = SeatCatalog::from_layout(vec![
            RankLayout::new(Rank::S, 2, 500),
            RankLayout::new(Rank::A, 3, 0),
        ])
        .unwrap();
        let h = harness_with(catalog);
        h.service.bootstrap().await.unwrap();

        let first = h
            .service
            .reserve_in_rank(EventId(1), Rank::S, UserId(1))
            .await
            .unwrap();
        let second = h
            .service
            .reserve_in_rank(EventId(1), Rank::S, UserId(1))
            .await
            .unwrap();
        assert_eq!(first.seat_id, SeatId(1));
        assert_eq!(second.seat_id, SeatId(2));

        assert_matches!(
            h.service
                .reserve_in_rank(EventId(1), Rank::S, UserId(1))
                .await,
            Err(Error::SoldOut { event_id: 1, .. })
        );
        assert_eq!(
            h.service
                .remaining_seats(EventId(1), Some(Rank::S))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_cancel_unknown_reservation() {
        let h = harness();
        h.service.bootstrap().await.unwrap();
        assert_matches!(
            h.service.cancel(EventId(1), ReservationId(77)).await,
            Err(Error::ReservationNotFound(77))
        );
    }

    #[tokio::test]
    async fn test_cancel_frees_the_seat() {
        let h = harness();
        h.service.bootstrap().await.unwrap();
        let r = h
            .service
            .reserve(EventId(1), SeatId(250), UserId(3))
            .await
            .unwrap();

        let canceled = h.service.cancel(EventId(1), r.id).await.unwrap();
        assert!(!canceled.is_active());
        assert_eq!(
            h.service
                .remaining_seats(EventId(1), Some(Rank::B))
                .await
                .unwrap(),
            300
        );
        assert!(h
            .service
            .reserve(EventId(1), SeatId(250), UserId(4))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_failed_propagation_schedules_rebuild() {
        let h = harness();
        let stale = h
            .store
            .insert_reservation(NewReservation {
                event_id: EventId(1),
                seat_id: SeatId(60),
                user_id: UserId(1),
            })
            .await
            .unwrap();
        h.service.bootstrap().await.unwrap();

        // The cancel reaches the store but is never propagated
        h.store.cancel_reservation(stale.id).await.unwrap();

        let fresh = h
            .service
            .reserve(EventId(1), SeatId(60), UserId(2))
            .await
            .unwrap();
        assert_eq!(h.events.events_of_type("RebuildScheduled").len(), 1);

        h.service.wait_for_rebuilds().await;
        assert_eq!(
            h.service
                .list_active_reservations(EventId(1), Some(Rank::A))
                .await
                .unwrap(),
            vec![fresh]
        );
    }

    #[tokio::test]
    async fn test_unknown_seat_propagation_is_swallowed() {
        let h = harness();
        h.service.bootstrap().await.unwrap();
        let bogus = Reservation {
            id: ReservationId(99),
            event_id: EventId(1),
            seat_id: SeatId(5000),
            user_id: UserId(1),
            reserved_at: chrono::Utc::now(),
            canceled_at: None,
        };
        assert_eq!(h.service.on_reservation_created(EventId(1), bogus).await, None);
        assert!(h.events.events_of_type("RebuildScheduled").is_empty());
    }

    #[tokio::test]
    async fn test_list_events_filters_private() {
        let h = harness();
        h.service.bootstrap().await.unwrap();
        h.service
            .reserve(EventId(2), SeatId(1), UserId(1))
            .await
            .unwrap();

        let public = h.service.list_events(false).await.unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].id, EventId(1));
        assert_eq!(public[0].remains, 1000);

        let all = h.service.list_events(true).await.unwrap();
        let ids: Vec<u64> = all.iter().map(|e| e.id.get()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(all[1].remains, 999);
        assert_eq!(all[1].ranks[&Rank::S].remains, 49);
        assert_eq!(all[1].ranks[&Rank::S].price, 6000);
    }

    #[tokio::test]
    async fn test_event_detail_seat_map() {
        let h = harness();
        h.service.bootstrap().await.unwrap();
        h.service
            .reserve(EventId(1), SeatId(2), UserId(10))
            .await
            .unwrap();
        h.service
            .reserve(EventId(1), SeatId(51), UserId(11))
            .await
            .unwrap();

        let detail = h
            .service
            .event_detail(EventId(1), Some(UserId(10)))
            .await
            .unwrap();
        assert_eq!(detail.seats[&Rank::S].len(), 50);
        assert_eq!(detail.seats[&Rank::C].len(), 500);

        let mine = &detail.seats[&Rank::S][1];
        assert!(mine.reserved && mine.mine);
        assert!(mine.reserved_at.is_some());

        let theirs = &detail.seats[&Rank::A][0];
        assert!(theirs.reserved && !theirs.mine);
        assert!(!detail.seats[&Rank::S][0].reserved);
        assert_eq!(detail.summary.remains, 998);

        assert_matches!(
            h.service.event_detail(EventId(42), None).await,
            Err(Error::EventNotFound(42))
        );
    }

    #[tokio::test]
    async fn test_unknown_event_has_no_availability() {
        let h = harness();
        h.service.bootstrap().await.unwrap();
        let before = h.service.cache().cached_keys();

        assert_matches!(
            h.service.remaining_seats(EventId(999), None).await,
            Err(Error::EventNotFound(999))
        );
        assert_matches!(
            h.service.remaining_seats(EventId(999), Some(Rank::S)).await,
            Err(Error::EventNotFound(999))
        );
        assert_eq!(h.service.cache().cached_keys(), before);
    }

    #[tokio::test]
    async fn test_closed_event_rejection_refreshes_metadata() {
        let h = harness();
        h.service.bootstrap().await.unwrap();
        assert!(!h.service.list_events(false).await.unwrap()[0].closed);

        h.store.put_event(EventRecord {
            closed: true,
            ..event(1, true)
        });
        assert_matches!(
            h.service.reserve(EventId(1), SeatId(3), UserId(1)).await,
            Err(Error::EventClosed(1))
        );

        let listed = h.service.list_events(false).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].closed);
    }

    #[test]
    fn test_sanitized_summary() {
        let summary = EventSummary {
            id: EventId(1),
            title: "gala".into(),
            public: true,
            closed: true,
            price: 1500,
            total: 1000,
            remains: 10,
            ranks: BTreeMap::new(),
        };
        let sanitized = summary.sanitized();
        assert_eq!(sanitized.price, 0);
        assert!(!sanitized.public && !sanitized.closed);
        assert_eq!(sanitized.title, "gala");
        assert_eq!(sanitized.remains, 10);
    }
}
