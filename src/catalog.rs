//! Seat Catalog
//!
//! Static mapping of seat identifiers to (rank, sequence number, price
//! offset). Built once at startup and read-only afterwards, so it is shared
//! behind an `Arc` without any locking.
//!
//! Seat ids are assigned contiguously in rank order. With the default layout:
//!
//! ```text
//! rank  seats        capacity  price offset
//! S     1..=50       50        5000
//! A     51..=200     150       3000
//! B     201..=500    300       1000
//! C     501..=1000   500       0
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::{Rank, SeatId};
use crate::error::{Error, Result};

/// One seat of the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Seat {
    pub id: SeatId,
    pub rank: Rank,
    /// 1-based position within the rank
    pub num: u32,
    pub price_offset: u64,
}

/// Layout of one rank, as read from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankLayout {
    pub rank: Rank,
    pub capacity: u32,
    #[serde(default)]
    pub price_offset: u64,
}

impl RankLayout {
    pub const fn new(rank: Rank, capacity: u32, price_offset: u64) -> Self {
        Self {
            rank,
            capacity,
            price_offset,
        }
    }
}

/// The venue layout used when no configuration overrides it.
pub fn default_layout() -> Vec<RankLayout> {
    vec![
        RankLayout::new(Rank::S, 50, 5000),
        RankLayout::new(Rank::A, 150, 3000),
        RankLayout::new(Rank::B, 300, 1000),
        RankLayout::new(Rank::C, 500, 0),
    ]
}

#[derive(Debug, Clone)]
struct RankSpan {
    layout: RankLayout,
    /// Index into `seats` of the rank's first seat
    start: usize,
}

/// Immutable seat catalog.
#[derive(Debug, Clone)]
pub struct SeatCatalog {
    seats: Vec<Seat>,
    spans: Vec<RankSpan>,
}

impl Default for SeatCatalog {
    fn default() -> Self {
        // The built-in layout is known to be valid.
        Self::build(default_layout())
    }
}

impl SeatCatalog {
    /// Build a catalog from an explicit layout.
    pub fn from_layout(layout: Vec<RankLayout>) -> Result<Self> {
        if layout.is_empty() {
            return Err(Error::Config("seat layout has no ranks".into()));
        }
        let mut seen = HashSet::new();
        for rank in &layout {
            if !seen.insert(rank.rank) {
                return Err(Error::Config(format!(
                    "rank {} appears twice in seat layout",
                    rank.rank
                )));
            }
            if rank.capacity == 0 {
                return Err(Error::Config(format!("rank {} has zero capacity", rank.rank)));
            }
        }
        Ok(Self::build(layout))
    }

    fn build(layout: Vec<RankLayout>) -> Self {
        let total: usize = layout.iter().map(|r| r.capacity as usize).sum();
        let mut seats = Vec::with_capacity(total);
        let mut spans = Vec::with_capacity(layout.len());

        for rank in layout {
            spans.push(RankSpan {
                layout: rank,
                start: seats.len(),
            });
            for num in 1..=rank.capacity {
                seats.push(Seat {
                    id: SeatId(seats.len() as u64 + 1),
                    rank: rank.rank,
                    num,
                    price_offset: rank.price_offset,
                });
            }
        }

        Self { seats, spans }
    }

    /// Look up a seat by id.
    pub fn seat(&self, id: SeatId) -> Result<&Seat> {
        id.get()
            .checked_sub(1)
            .and_then(|idx| self.seats.get(idx as usize))
            .ok_or(Error::SeatNotFound(id.get()))
    }

    /// Resolve the rank of a seat.
    pub fn rank_of(&self, id: SeatId) -> Result<Rank> {
        self.seat(id).map(|s| s.rank)
    }

    /// Ranks in layout order.
    pub fn ranks(&self) -> impl Iterator<Item = Rank> + '_ {
        self.spans.iter().map(|s| s.layout.rank)
    }

    /// Check if the rank is part of this venue.
    pub fn has_rank(&self, rank: Rank) -> bool {
        self.span(rank).is_some()
    }

    /// Number of seats in a rank (0 for a rank the venue does not have).
    pub fn capacity(&self, rank: Rank) -> usize {
        self.span(rank)
            .map(|s| s.layout.capacity as usize)
            .unwrap_or(0)
    }

    /// Number of seats in the venue.
    pub fn total_capacity(&self) -> usize {
        self.seats.len()
    }

    /// Price offset added to an event's base price for this rank.
    pub fn price_offset(&self, rank: Rank) -> u64 {
        self.span(rank).map(|s| s.layout.price_offset).unwrap_or(0)
    }

    /// Seats of a rank ordered by sequence number.
    pub fn seats_in(&self, rank: Rank) -> &[Seat] {
        match self.span(rank) {
            Some(span) => &self.seats[span.start..span.start + span.layout.capacity as usize],
            None => &[],
        }
    }

    /// The layout this catalog was built from.
    pub fn layout(&self) -> Vec<RankLayout> {
        self.spans.iter().map(|s| s.layout).collect()
    }

    fn span(&self, rank: Rank) -> Option<&RankSpan> {
        self.spans.iter().find(|s| s.layout.rank == rank)
    }
}

// =============================================================================
// Tests
// =============================================================================
