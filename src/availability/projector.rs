//! Availability Projector
//!
//! Pure computation of remaining seats: catalog capacity minus the active
//! reservations of a cache snapshot. Holds no state and never touches the
//! cache. A rank missing from the snapshot counts as zero reservations.

use std::collections::BTreeMap;

use serde::Serialize;

use super::cache::EventSnapshot;
use super::entry::EntryKey;
use crate::catalog::SeatCatalog;
use crate::domain::Rank;
use crate::error::{Error, Result};

/// Availability of one rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankAvailability {
    pub total: usize,
    pub remains: usize,
    /// Event base price plus the rank's offset
    pub price: u64,
}

/// Availability of one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub total: usize,
    pub remains: usize,
    pub ranks: BTreeMap<Rank, RankAvailability>,
}

impl Availability {
    /// Remaining seats in a rank (0 for a rank the venue does not have).
    pub fn remains_in(&self, rank: Rank) -> usize {
        self.ranks.get(&rank).map_or(0, |r| r.remains)
    }

    pub fn is_sold_out(&self) -> bool {
        self.remains == 0
    }
}

/// Remaining seats of one rank.
///
/// More active reservations than seats is a bug, reported as `Inconsistency`.
pub fn remaining(catalog: &SeatCatalog, snapshot: &EventSnapshot, rank: Rank) -> Result<usize> {
    let capacity = catalog.capacity(rank);
    let active = snapshot.count(rank);
    capacity
        .checked_sub(active)
        .ok_or_else(|| Error::Inconsistency {
            key: EntryKey::new(snapshot.event_id, rank).storage_key(),
            reason: format!("{} active reservations exceed capacity {}", active, capacity),
        })
}

/// Project per-rank and total availability of an event.
pub fn project(catalog: &SeatCatalog, snapshot: &EventSnapshot, base_price: u64) -> Result<Availability> {
    let mut ranks = BTreeMap::new();
    let mut remains = 0;

    for rank in catalog.ranks() {
        let left = remaining(catalog, snapshot, rank)?;
        remains += left;
        ranks.insert(
            rank,
            RankAvailability {
                total: catalog.capacity(rank),
                remains: left,
                price: base_price + catalog.price_offset(rank),
            },
        );
    }

    Ok(Availability {
        total: catalog.total_capacity(),
        remains,
        ranks,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RankLayout;
    use crate::domain::{EventId, Reservation, ReservationId, SeatId, UserId};
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn reservations(rank_start: u64, n: u64) -> Vec<Reservation> {
        (0..n)
            .map(|i| Reservation {
                id: ReservationId(rank_start * 1000 + i),
                event_id: EventId(1),
                seat_id: SeatId(rank_start + i),
                user_id: UserId(1),
                reserved_at: Utc::now(),
                canceled_at: None,
            })
            .collect()
    }

    fn snapshot(entries: Vec<(Rank, Vec<Reservation>)>) -> EventSnapshot {
        EventSnapshot {
            event_id: EventId(1),
            entries: entries.into_iter().collect(),
        }
    }

    #[test]
    fn test_empty_snapshot_is_fully_available() {
        let catalog = SeatCatalog::default();
        let availability = project(&catalog, &snapshot(vec![]), 1000).unwrap();

        assert_eq!(availability.total, 1000);
        assert_eq!(availability.remains, 1000);
        assert_eq!(availability.ranks[&Rank::S].price, 6000);
        assert_eq!(availability.ranks[&Rank::A].price, 4000);
        assert_eq!(availability.ranks[&Rank::B].price, 2000);
        assert_eq!(availability.ranks[&Rank::C].price, 1000);
    }

    #[test]
    fn test_counts_are_subtracted_per_rank() {
        let catalog = SeatCatalog::default();
        let snap = snapshot(vec![
            (Rank::S, reservations(1, 50)),
            (Rank::B, reservations(201, 3)),
        ]);
        let availability = project(&catalog, &snap, 0).unwrap();

        assert_eq!(availability.remains_in(Rank::S), 0);
        assert_eq!(availability.remains_in(Rank::A), 150);
        assert_eq!(availability.remains_in(Rank::B), 297);
        assert_eq!(availability.remains, 1000 - 53);
        assert!(!availability.is_sold_out());
    }

    #[test]
    fn test_overbooked_rank_is_an_error() {
        let catalog = SeatCatalog::from_layout(vec![RankLayout::new(Rank::S, 2, 0)]).unwrap();
        let snap = snapshot(vec![(Rank::S, reservations(1, 3))]);

        assert_matches!(
            remaining(&catalog, &snap, Rank::S),
            Err(Error::Inconsistency { .. })
        );
        assert_matches!(project(&catalog, &snap, 0), Err(Error::Inconsistency { .. }));
    }

    #[test]
    fn test_sold_out() {
        let catalog = SeatCatalog::from_layout(vec![RankLayout::new(Rank::C, 2, 0)]).unwrap();
        let snap = snapshot(vec![(Rank::C, reservations(1, 2))]);
        assert!(project(&catalog, &snap, 0).unwrap().is_sold_out());
    }
}
