//! Cache Entry Types
//!
//! An entry holds the active reservations of one `(event, rank)` key in
//! insertion order. Each key lives in a [`KeySlot`] with its own lock, so
//! mutations of independent keys never contend with each other.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::domain::{EventId, Rank, Reservation, ReservationId};
use crate::error::{Error, Result};

/// Fixed prefix of the deterministic storage key
pub const KEY_PREFIX: &str = "ALL-RESERVATIONS-EVENT-ID-";

/// Cache key - one entry per event and rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub event_id: EventId,
    pub rank: Rank,
}

impl EntryKey {
    pub fn new(event_id: EventId, rank: Rank) -> Self {
        Self { event_id, rank }
    }

    /// Deterministic string key, e.g. `ALL-RESERVATIONS-EVENT-ID-7-A`.
    pub fn storage_key(&self) -> String {
        format!("{}{}-{}", KEY_PREFIX, self.event_id, self.rank)
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}-{}", KEY_PREFIX, self.event_id, self.rank)
    }
}

/// Result of applying a create to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Same id already present; duplicate propagation
    Duplicate,
    /// Id was canceled earlier; late-arriving create
    Stale,
}

/// Result of applying a cancel to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// Id was already canceled; duplicate propagation
    AlreadyCanceled,
    /// Id never seen by this entry
    Unknown,
}

/// Active reservations of one key.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    reservations: Vec<Reservation>,
    /// Ids canceled through this entry. A reservation never becomes active
    /// again once canceled, so these stay valid for the entry's lifetime.
    tombstones: HashSet<ReservationId>,
}

impl Entry {
    /// Build an entry from records fetched from the record store.
    ///
    /// Canceled records and repeated ids are dropped.
    pub fn from_records(records: Vec<Reservation>) -> Self {
        let mut seen = HashSet::with_capacity(records.len());
        let reservations = records
            .into_iter()
            .filter(|r| r.is_active() && seen.insert(r.id))
            .collect();
        Self {
            reservations,
            tombstones: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn contains(&self, id: ReservationId) -> bool {
        self.reservations.iter().any(|r| r.id == id)
    }

    pub fn is_canceled(&self, id: ReservationId) -> bool {
        self.tombstones.contains(&id)
    }

    /// Copy of the active reservations in insertion order.
    pub fn snapshot(&self) -> Vec<Reservation> {
        self.reservations.clone()
    }

    /// Append a reservation, idempotently by id.
    ///
    /// Fails if another active reservation already holds the seat or if the
    /// rank would exceed `capacity`; both mean the entry has drifted.
    pub fn append(
        &mut self,
        key: &EntryKey,
        reservation: Reservation,
        capacity: usize,
    ) -> Result<AppendOutcome> {
        if self.tombstones.contains(&reservation.id) {
            return Ok(AppendOutcome::Stale);
        }
        if let Some(existing) = self
            .reservations
            .iter()
            .find(|r| r.id == reservation.id || r.seat_id == reservation.seat_id)
        {
            if existing.id == reservation.id {
                return Ok(AppendOutcome::Duplicate);
            }
            return Err(Error::Inconsistency {
                key: key.storage_key(),
                reason: format!(
                    "seat {} already held by reservation {}, cannot add {}",
                    existing.seat_id, existing.id, reservation.id
                ),
            });
        }
        if self.reservations.len() >= capacity {
            return Err(Error::Inconsistency {
                key: key.storage_key(),
                reason: format!("rank capacity {} already reached", capacity),
            });
        }
        self.reservations.push(reservation);
        Ok(AppendOutcome::Appended)
    }

    /// Remove a reservation by id. Never matches by value.
    pub fn remove(&mut self, id: ReservationId) -> RemoveOutcome {
        let fresh = self.tombstones.insert(id);
        match self.reservations.iter().position(|r| r.id == id) {
            Some(idx) => {
                self.reservations.remove(idx);
                RemoveOutcome::Removed
            }
            None if fresh => RemoveOutcome::Unknown,
            None => RemoveOutcome::AlreadyCanceled,
        }
    }

    /// Ids canceled through this entry.
    pub fn tombstones(&self) -> impl Iterator<Item = ReservationId> + '_ {
        self.tombstones.iter().copied()
    }
}

/// Writes that arrived while a key was being loaded.
#[derive(Debug, Clone, Default)]
pub struct PendingWrites {
    created: Vec<Reservation>,
    canceled: HashSet<ReservationId>,
}

impl PendingWrites {
    /// Start from cancels an earlier generation of the key already knew.
    pub fn with_canceled(ids: impl IntoIterator<Item = ReservationId>) -> Self {
        Self {
            created: Vec::new(),
            canceled: ids.into_iter().collect(),
        }
    }

    pub fn push_created(&mut self, reservation: Reservation) {
        if !self.created.iter().any(|r| r.id == reservation.id) {
            self.created.push(reservation);
        }
    }

    pub fn push_canceled(&mut self, id: ReservationId) {
        self.canceled.insert(id);
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.canceled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.canceled.is_empty()
    }

    /// Fold the buffered writes into a freshly fetched entry.
    ///
    /// Returns the drift errors raised by the merge; the affected writes are
    /// skipped, the rest of the entry is still published.
    pub fn merge_into(self, key: &EntryKey, entry: &mut Entry, capacity: usize) -> Vec<Error> {
        let mut errors = Vec::new();
        for id in self.canceled {
            entry.remove(id);
        }
        for reservation in self.created {
            if let Err(e) = entry.append(key, reservation, capacity) {
                errors.push(e);
            }
        }
        errors
    }
}

/// State of one key.
#[derive(Debug)]
pub enum SlotState {
    /// A rebuild is fetching from the record store.
    Loading { token: u64, pending: PendingWrites },
    /// Entry published and serving reads.
    Ready(Entry),
}

/// Per-key cell. All mutation of a key happens under its lock.
#[derive(Debug)]
pub struct KeySlot {
    state: RwLock<SlotState>,
}

impl KeySlot {
    pub fn loading(token: u64) -> Self {
        Self::loading_with(token, PendingWrites::default())
    }

    pub fn loading_with(token: u64, pending: PendingWrites) -> Self {
        Self {
            state: RwLock::new(SlotState::Loading { token, pending }),
        }
    }

    /// Tombstones of the published entry (empty while loading).
    pub fn tombstones(&self) -> Vec<ReservationId> {
        self.read(|entry| entry.tombstones().collect())
            .unwrap_or_default()
    }

    pub fn ready(entry: Entry) -> Self {
        Self {
            state: RwLock::new(SlotState::Ready(entry)),
        }
    }

    /// Read the published entry, if any.
    pub fn read<R>(&self, f: impl FnOnce(&Entry) -> R) -> Option<R> {
        match &*self.state.read() {
            SlotState::Ready(entry) => Some(f(entry)),
            SlotState::Loading { .. } => None,
        }
    }

    /// Mutate under the slot lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SlotState) -> R) -> R {
        f(&mut self.state.write())
    }

    /// Check if the slot is loading under `token`.
    pub fn is_loading_with(&self, token: u64) -> bool {
        matches!(&*self.state.read(), SlotState::Loading { token: t, .. } if *t == token)
    }

    /// Publish fetched records.
    ///
    /// A loading slot merges its buffered writes into `fetched` and becomes
    /// ready. A slot that some other loader already published keeps its
    /// contents. Returns the published snapshot and any merge errors.
    pub fn publish(
        &self,
        key: &EntryKey,
        fetched: Vec<Reservation>,
        capacity: usize,
    ) -> (Vec<Reservation>, Vec<Error>) {
        let mut state = self.state.write();
        match &mut *state {
            SlotState::Ready(entry) => (entry.snapshot(), Vec::new()),
            SlotState::Loading { pending, .. } => {
                let mut entry = Entry::from_records(fetched);
                let errors = std::mem::take(pending).merge_into(key, &mut entry, capacity);
                let snapshot = entry.snapshot();
                *state = SlotState::Ready(entry);
                (snapshot, errors)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
