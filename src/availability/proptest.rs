//! Property-Based Tests for the Availability Cache
//!
//! # Test Properties
//!
//! 1. **No Duplication**: any interleaving of creates and cancels leaves each
//!    id at most once, in first-insertion order
//! 2. **Cancel Order Independence**: cancels for distinct ids commute
//! 3. **Conservation**: remaining = total capacity - sum of rank counts, never negative
//! 4. **Idempotent Bootstrap**: bootstrapping twice yields identical contents

#![cfg(test)]

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;

use super::cache::{AvailabilityCache, CacheConfig};
use super::entry::{Entry, EntryKey};
use super::projector::project;
use crate::adapters::{InMemoryEventCollector, InMemoryRecordStore};
use crate::catalog::SeatCatalog;
use crate::domain::{
    EventId, EventPublisher, EventRecord, NewReservation, Rank, RecordStore, Reservation,
    ReservationId, SeatId, UserId,
};

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Op {
    Create(u64),
    Cancel(u64),
}

/// Creates and cancels over a small id space so collisions are frequent.
fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            3 => (1u64..40).prop_map(Op::Create),
            1 => (1u64..40).prop_map(Op::Cancel),
        ],
        0..200,
    )
}

/// Distinct seats of the default 1000-seat venue.
fn seats_strategy() -> impl Strategy<Value = HashSet<u64>> {
    prop::collection::hash_set(1u64..=1000, 0..300)
}

fn reservation(id: u64) -> Reservation {
    Reservation {
        id: ReservationId(id),
        event_id: EventId(1),
        seat_id: SeatId(id),
        user_id: UserId(1),
        reserved_at: Utc::now(),
        canceled_at: None,
    }
}

async fn seeded_cache(seats: &HashSet<u64>) -> AvailabilityCache {
    let catalog = Arc::new(SeatCatalog::default());
    let store = Arc::new(InMemoryRecordStore::new(Arc::clone(&catalog)));
    store.put_event(EventRecord {
        id: EventId(1),
        title: "prop".into(),
        public: true,
        closed: false,
        price: 0,
    });
    for &seat in seats {
        store
            .insert_reservation(NewReservation {
                event_id: EventId(1),
                seat_id: SeatId(seat),
                user_id: UserId(seat % 7),
            })
            .await
            .unwrap();
    }
    AvailabilityCache::new(
        CacheConfig::default(),
        catalog,
        store as Arc<dyn RecordStore>,
        Arc::new(InMemoryEventCollector::new()) as Arc<dyn EventPublisher>,
    )
}

// =============================================================================
// Entry Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: the entry matches a simple model and never repeats an id.
    #[test]
    fn prop_no_duplication(ops in ops_strategy()) {
        let key = EntryKey::new(EventId(1), Rank::C);
        let mut entry = Entry::default();
        let mut model: Vec<u64> = Vec::new();
        let mut canceled: HashSet<u64> = HashSet::new();

        for op in ops {
            match op {
                Op::Create(id) => {
                    entry.append(&key, reservation(id), 1000)?;
                    if !canceled.contains(&id) && !model.contains(&id) {
                        model.push(id);
                    }
                }
                Op::Cancel(id) => {
                    entry.remove(ReservationId(id));
                    canceled.insert(id);
                    model.retain(|m| *m != id);
                }
            }
        }

        let ids: Vec<u64> = entry.snapshot().iter().map(|r| r.id.get()).collect();
        let unique: HashSet<u64> = ids.iter().copied().collect();
        prop_assert_eq!(unique.len(), ids.len());
        prop_assert_eq!(entry.len(), ids.len());
        prop_assert_eq!(ids, model);
    }

    /// Property: cancels for distinct ids give the same result in any order.
    #[test]
    fn prop_cancel_order_independent(
        ids in prop::collection::hash_set(1u64..100, 1..50),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 0..20),
    ) {
        let key = EntryKey::new(EventId(1), Rank::C);
        let ids: Vec<u64> = ids.into_iter().collect();
        let mut base = Entry::default();
        for &id in &ids {
            base.append(&key, reservation(id), 1000)?;
        }

        let cancels: Vec<u64> = picks.iter().map(|i| ids[i.index(ids.len())]).collect();
        let mut forward = base.clone();
        let mut backward = base;
        for id in &cancels {
            forward.remove(ReservationId(*id));
        }
        for id in cancels.iter().rev() {
            backward.remove(ReservationId(*id));
        }

        prop_assert_eq!(forward.snapshot(), backward.snapshot());
    }
}

// =============================================================================
// Cache Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: remaining seats conserve the venue capacity.
    #[test]
    fn prop_conservation(seats in seats_strategy()) {
        let (availability, counts) = tokio_test::block_on(async {
            let cache = seeded_cache(&seats).await;
            cache.bootstrap().await.unwrap();
            let snapshot = cache.snapshot(EventId(1)).await.unwrap();
            let mut counts = 0;
            for rank in Rank::ALL {
                counts += cache.count(EventId(1), Some(rank)).await.unwrap();
            }
            (project(cache.catalog(), &snapshot, 0).unwrap(), counts)
        });

        prop_assert_eq!(counts, seats.len());
        prop_assert_eq!(availability.remains, availability.total - counts);
        for (rank, ranked) in &availability.ranks {
            prop_assert!(ranked.remains <= ranked.total, "rank {} over capacity", rank);
        }
    }

    /// Property: a second bootstrap with no writes changes nothing.
    #[test]
    fn prop_bootstrap_idempotent(seats in seats_strategy()) {
        let (first, second) = tokio_test::block_on(async {
            let cache = seeded_cache(&seats).await;
            cache.bootstrap().await.unwrap();
            let first = cache.snapshot(EventId(1)).await.unwrap();
            cache.bootstrap().await.unwrap();
            let second = cache.snapshot(EventId(1)).await.unwrap();
            (first, second)
        });

        prop_assert_eq!(first, second);
    }
}
