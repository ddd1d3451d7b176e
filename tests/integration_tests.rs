//! Seatkeeper Integration Tests
//!
//! End-to-end tests through the public API:
//! - Availability cache properties (conservation, idempotence, no duplication)
//! - Booking scenarios against a record store
//! - Failure handling on the read and write paths
//! - Event metadata staleness

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use seatkeeper::adapters::{InMemoryEventCollector, InMemoryRecordStore};
use seatkeeper::availability::{
    AvailabilityCache, CacheConfig, EventMetadataCache, WriteOutcome,
};
use seatkeeper::catalog::SeatCatalog;
use seatkeeper::domain::{
    EventId, EventPublisher, EventRecord, NewReservation, Rank, RecordStore, Reservation,
    ReservationId, SeatId, UserId,
};
use seatkeeper::{AvailabilityService, Error};

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    store: Arc<InMemoryRecordStore>,
    events: Arc<InMemoryEventCollector>,
    service: Arc<AvailabilityService>,
}

impl Harness {
    fn cache(&self) -> &AvailabilityCache {
        self.service.cache()
    }

    /// Write straight to the record store, bypassing propagation.
    async fn insert(&self, event: u64, seat: u64) -> Reservation {
        self.store
            .insert_reservation(NewReservation {
                event_id: EventId(event),
                seat_id: SeatId(seat),
                user_id: UserId(1),
            })
            .await
            .unwrap()
    }
}

fn event(id: u64) -> EventRecord {
    EventRecord {
        id: EventId(id),
        title: format!("event {}", id),
        public: true,
        closed: false,
        price: 1000,
    }
}

fn build(config: CacheConfig, metadata_ttl: Duration) -> Harness {
    let catalog = Arc::new(SeatCatalog::default());
    let store = Arc::new(InMemoryRecordStore::new(Arc::clone(&catalog)));
    store.put_event(event(1));
    store.put_event(event(7));
    let events = Arc::new(InMemoryEventCollector::new());

    let timeout = config.store_timeout;
    let cache = Arc::new(AvailabilityCache::new(
        config,
        catalog,
        store.clone() as Arc<dyn RecordStore>,
        events.clone() as Arc<dyn EventPublisher>,
    ));
    let metadata = Arc::new(EventMetadataCache::new(
        store.clone() as Arc<dyn RecordStore>,
        metadata_ttl,
        timeout,
    ));
    let service = Arc::new(AvailabilityService::new(
        cache,
        metadata,
        store.clone() as Arc<dyn RecordStore>,
        events.clone() as Arc<dyn EventPublisher>,
    ));

    Harness {
        store,
        events,
        service,
    }
}

fn harness() -> Harness {
    build(CacheConfig::default(), Duration::from_secs(120))
}

fn ids(reservations: &[Reservation]) -> Vec<ReservationId> {
    reservations.iter().map(|r| r.id).collect()
}

// =============================================================================
// Property Tests
// =============================================================================

mod property_tests {
    use super::*;

    #[tokio::test]
    async fn test_conservation_after_mixed_writes() {
        let h = harness();
        h.service.bootstrap().await.unwrap();

        let mut held = Vec::new();
        for seat in [1, 2, 60, 61, 250, 700, 701, 702] {
            held.push(
                h.service
                    .reserve(EventId(1), SeatId(seat), UserId(seat))
                    .await
                    .unwrap(),
            );
        }
        h.service.cancel(EventId(1), held[2].id).await.unwrap();
        h.service.cancel(EventId(1), held[6].id).await.unwrap();

        let mut counted = 0;
        for rank in Rank::ALL {
            let count = h.cache().count(EventId(1), Some(rank)).await.unwrap();
            let listed = h.cache().list(EventId(1), Some(rank)).await.unwrap();
            assert_eq!(count, listed.len());
            counted += count;
        }

        let total = h.cache().catalog().total_capacity();
        let remaining = h.service.remaining_seats(EventId(1), None).await.unwrap();
        assert_eq!(counted, 6);
        assert_eq!(remaining, total - counted);
    }

    #[tokio::test]
    async fn test_bootstrap_twice_is_identical() {
        let h = harness();
        for seat in [3, 80, 90, 400, 999] {
            h.insert(1, seat).await;
        }
        h.insert(7, 10).await;

        h.service.bootstrap().await.unwrap();
        let first_one = h.cache().snapshot(EventId(1)).await.unwrap();
        let first_seven = h.cache().snapshot(EventId(7)).await.unwrap();

        h.service.bootstrap().await.unwrap();
        assert_eq!(h.cache().snapshot(EventId(1)).await.unwrap(), first_one);
        assert_eq!(h.cache().snapshot(EventId(7)).await.unwrap(), first_seven);
        assert_eq!(first_one.total(), 5);
        assert_eq!(h.service.stats().bootstraps, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interleaved_creates_do_not_duplicate() {
        let h = harness();
        h.service.bootstrap().await.unwrap();

        let tasks: Vec<_> = (0..40u64)
            .map(|i| {
                let service = Arc::clone(&h.service);
                tokio::spawn(async move {
                    service
                        .reserve(EventId(1), SeatId(501 + i), UserId(i))
                        .await
                })
            })
            .collect();
        let created: Vec<Reservation> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        // Replay every propagation once more, as a duplicate delivery would
        for r in &created {
            let outcome = h.cache().record_created(EventId(1), r.clone()).await.unwrap();
            assert_eq!(outcome, WriteOutcome::Ignored);
        }

        let listed = h.cache().list(EventId(1), Some(Rank::C)).await.unwrap();
        let unique: HashSet<_> = ids(&listed).into_iter().collect();
        assert_eq!(listed.len(), 40);
        assert_eq!(unique.len(), 40);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let h = harness();
        h.service.bootstrap().await.unwrap();
        let r = h
            .service
            .reserve(EventId(1), SeatId(100), UserId(1))
            .await
            .unwrap();
        let keep = h
            .service
            .reserve(EventId(1), SeatId(101), UserId(1))
            .await
            .unwrap();
        h.store.cancel_reservation(r.id).await.unwrap();

        let first = h
            .service
            .on_reservation_canceled(EventId(1), r.id, Some(Rank::A))
            .await;
        let second = h
            .service
            .on_reservation_canceled(EventId(1), r.id, Some(Rank::A))
            .await;

        assert_eq!(first, Some(WriteOutcome::Applied));
        assert_eq!(second, Some(WriteOutcome::Ignored));
        assert_eq!(
            h.service
                .list_active_reservations(EventId(1), Some(Rank::A))
                .await
                .unwrap(),
            vec![keep]
        );
    }

    #[tokio::test]
    async fn test_miss_rebuilds_only_active_records() {
        let h = harness();
        let a = h.insert(7, 51).await;
        let b = h.insert(7, 120).await;
        let canceled = h.insert(7, 121).await;
        let c = h.insert(7, 200).await;
        h.insert(7, 5).await;
        h.store.cancel_reservation(canceled.id).await.unwrap();

        // Empty cache: no bootstrap
        let listed = h.cache().list(EventId(7), Some(Rank::A)).await.unwrap();
        assert_eq!(ids(&listed), vec![a.id, b.id, c.id]);
        assert!(h.cache().is_cached(EventId(7), Rank::A));
        assert!(!h.cache().is_cached(EventId(7), Rank::S));

        // Subsequent reads hit
        let misses = h.service.stats().misses;
        h.cache().list(EventId(7), Some(Rank::A)).await.unwrap();
        assert_eq!(h.service.stats().misses, misses);
    }
}

// =============================================================================
// Scenario Tests
// =============================================================================

mod scenario_tests {
    use super::*;

    #[tokio::test]
    async fn test_rank_s_fills_to_exactly_fifty() {
        let h = harness();
        h.service.bootstrap().await.unwrap();

        for seat in 1..=50 {
            h.service
                .reserve(EventId(1), SeatId(seat), UserId(seat))
                .await
                .unwrap();
        }
        assert_eq!(
            h.service
                .remaining_seats(EventId(1), Some(Rank::S))
                .await
                .unwrap(),
            0
        );

        // The 51st is rejected by the record store before reaching the cache
        assert_matches!(
            h.service.reserve(EventId(1), SeatId(17), UserId(99)).await,
            Err(Error::SeatTaken { .. })
        );
        assert_matches!(
            h.service
                .reserve_in_rank(EventId(1), Rank::S, UserId(99))
                .await,
            Err(Error::SoldOut { .. })
        );

        let listed = h
            .service
            .list_active_reservations(EventId(1), Some(Rank::S))
            .await
            .unwrap();
        assert_eq!(listed.len(), 50);
        assert_eq!(h.service.stats().inconsistencies, 0);
    }

    #[tokio::test]
    async fn test_cancel_then_rebook_in_same_rank() {
        let h = harness();
        h.service.bootstrap().await.unwrap();

        let r1 = h
            .service
            .reserve(EventId(1), SeatId(210), UserId(1))
            .await
            .unwrap();
        h.service.cancel(EventId(1), r1.id).await.unwrap();
        let r2 = h
            .service
            .reserve(EventId(1), SeatId(211), UserId(2))
            .await
            .unwrap();

        assert_eq!(
            h.service
                .list_active_reservations(EventId(1), Some(Rank::B))
                .await
                .unwrap(),
            vec![r2]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cancels_in_same_key() {
        let h = harness();
        h.service.bootstrap().await.unwrap();
        let r1 = h
            .service
            .reserve(EventId(1), SeatId(300), UserId(1))
            .await
            .unwrap();
        let r2 = h
            .service
            .reserve(EventId(1), SeatId(301), UserId(2))
            .await
            .unwrap();
        let r3 = h
            .service
            .reserve(EventId(1), SeatId(302), UserId(3))
            .await
            .unwrap();

        let first = {
            let service = Arc::clone(&h.service);
            tokio::spawn(async move { service.cancel(EventId(1), r2.id).await })
        };
        let second = {
            let service = Arc::clone(&h.service);
            tokio::spawn(async move { service.cancel(EventId(1), r1.id).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(
            h.service
                .list_active_reservations(EventId(1), Some(Rank::B))
                .await
                .unwrap(),
            vec![r3]
        );
    }

    #[tokio::test]
    async fn test_cancels_commute_at_the_cache() {
        for reversed in [false, true] {
            let h = harness();
            h.service.bootstrap().await.unwrap();
            let a = h
                .service
                .reserve(EventId(1), SeatId(600), UserId(1))
                .await
                .unwrap();
            let b = h
                .service
                .reserve(EventId(1), SeatId(601), UserId(1))
                .await
                .unwrap();

            let order = if reversed { [b.id, a.id] } else { [a.id, b.id] };
            for id in order {
                h.store.cancel_reservation(id).await.unwrap();
                let outcome = h
                    .cache()
                    .record_canceled(EventId(1), id, Some(Rank::C))
                    .await
                    .unwrap();
                assert_eq!(outcome, WriteOutcome::Applied);
            }
            assert_eq!(h.cache().count(EventId(1), Some(Rank::C)).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_event_listing_reflects_bookings() {
        let h = harness();
        h.service.bootstrap().await.unwrap();
        h.service
            .reserve_in_rank(EventId(7), Rank::A, UserId(4))
            .await
            .unwrap();

        let listed = h.service.list_events(false).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].id, EventId(7));
        assert_eq!(listed[1].remains, 999);
        assert_eq!(listed[1].ranks[&Rank::A].remains, 149);
        assert_eq!(listed[1].ranks[&Rank::A].price, 4000);

        let detail = h
            .service
            .event_detail(EventId(7), Some(UserId(4)))
            .await
            .unwrap();
        assert!(detail.seats[&Rank::A][0].mine);
    }
}

// =============================================================================
// Failure Tests
// =============================================================================

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_bootstrap_failure_is_fatal() {
        let h = harness();
        h.store.set_available(false);

        let result = h.service.bootstrap().await;
        assert_matches!(result, Err(Error::BackingStore(_)));
        assert!(!h.service.is_ready());
        assert!(h.cache().cached_keys().is_empty());
    }

    #[tokio::test]
    async fn test_read_rebuild_failure_is_retryable() {
        let h = harness();
        h.store.set_available(false);

        let err = h
            .service
            .remaining_seats(EventId(1), Some(Rank::S))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        h.store.set_available(true);
        assert_eq!(
            h.service
                .remaining_seats(EventId(1), Some(Rank::S))
                .await
                .unwrap(),
            50
        );
    }

    #[tokio::test]
    async fn test_bootstrap_timeout() {
        let h = build(
            CacheConfig {
                bootstrap_timeout: Duration::from_millis(20),
                ..CacheConfig::default()
            },
            Duration::from_secs(120),
        );
        h.store.set_latency(Duration::from_millis(200));

        assert_matches!(h.service.bootstrap().await, Err(Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_write_timeout_schedules_rebuild() {
        let h = build(
            CacheConfig {
                store_timeout: Duration::from_millis(50),
                ..CacheConfig::default()
            },
            Duration::from_secs(120),
        );
        h.service.bootstrap().await.unwrap();
        h.store.set_latency(Duration::from_millis(200));

        assert_matches!(
            h.service.reserve(EventId(1), SeatId(1), UserId(1)).await,
            Err(Error::Timeout { .. })
        );
        assert_eq!(h.events.events_of_type("RebuildScheduled").len(), 1);

        h.store.set_latency(Duration::ZERO);
        h.service.wait_for_rebuilds().await;
        assert_eq!(
            h.service
                .remaining_seats(EventId(1), Some(Rank::S))
                .await
                .unwrap(),
            50
        );
    }

    #[tokio::test]
    async fn test_missed_propagation_heals_on_rebuild() {
        let h = harness();
        h.service.bootstrap().await.unwrap();

        // Applied to the record store only
        let lost = h.insert(1, 42).await;
        assert_eq!(h.cache().count(EventId(1), Some(Rank::S)).await.unwrap(), 0);

        h.cache().invalidate(EventId(1), Some(Rank::S));
        assert_eq!(
            h.cache().list(EventId(1), Some(Rank::S)).await.unwrap(),
            vec![lost]
        );
    }

    #[tokio::test]
    async fn test_unmatched_cancel_is_observed_not_failed() {
        let h = harness();
        h.service.bootstrap().await.unwrap();

        let outcome = h
            .service
            .on_reservation_canceled(EventId(1), ReservationId(12345), Some(Rank::B))
            .await;
        assert_eq!(outcome, Some(WriteOutcome::Unmatched));
        assert_eq!(h.events.events_of_type("InconsistencyDetected").len(), 1);
        assert!(h.events.events_of_type("RebuildScheduled").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_event_reads_do_not_grow_cache() {
        let h = harness();
        h.service.bootstrap().await.unwrap();
        let keys = h.cache().cached_keys();

        for id in 1000..1200 {
            assert_matches!(
                h.service.remaining_seats(EventId(id), None).await,
                Err(Error::EventNotFound(n)) if n == id
            );
        }
        assert_eq!(h.cache().cached_keys(), keys);
        assert_eq!(h.cache().stats().entries, keys.len());
        assert_eq!(h.events.warnings(), 0);
    }
}

// =============================================================================
// Metadata Tests
// =============================================================================

mod metadata_tests {
    use super::*;

    #[tokio::test]
    async fn test_metadata_lags_by_at_most_the_ttl() {
        let h = build(CacheConfig::default(), Duration::from_millis(50));
        h.service.bootstrap().await.unwrap();

        h.store.put_event(EventRecord {
            title: "renamed".into(),
            ..event(1)
        });
        let stale = h.service.event_detail(EventId(1), None).await.unwrap();
        assert_eq!(stale.summary.title, "event 1");

        tokio::time::sleep(Duration::from_millis(80)).await;
        let fresh = h.service.event_detail(EventId(1), None).await.unwrap();
        assert_eq!(fresh.summary.title, "renamed");
    }

    #[tokio::test]
    async fn test_private_events_hidden_from_listing() {
        let h = harness();
        h.store.put_event(EventRecord {
            public: false,
            ..event(3)
        });
        h.service.bootstrap().await.unwrap();

        let public: Vec<_> = h
            .service
            .list_events(false)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(public, vec![EventId(1), EventId(7)]);

        let all = h.service.list_events(true).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].sanitized().price, 0);
    }
}
