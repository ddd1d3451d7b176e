//! Availability Cache
//!
//! Derived view of active reservations, one entry per `(event, rank)`,
//! kept in step with the record store.
//!
//! # Protocol
//!
//! - The record store is written first; the cache is told afterwards via
//!   [`AvailabilityCache::record_created`] / [`AvailabilityCache::record_canceled`].
//! - A key that is not cached is filled on first read. The reader installs a
//!   `Loading` slot, fetches outside any lock, and publishes. Writes that
//!   arrive while the slot is loading are buffered in it and merged by
//!   reservation id when the fetch is published.
//! - Writes for a key that is not cached at all are dropped: the record
//!   store already has them and the next read rebuilds from it.
//! - Creates and cancels are applied by reservation id, so duplicate or
//!   late-arriving propagations are no-ops.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use super::entry::{AppendOutcome, Entry, EntryKey, KeySlot, PendingWrites, RemoveOutcome, SlotState};
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::shard::{ShardedMap, DEFAULT_SHARD_COUNT};
use crate::catalog::SeatCatalog;
use crate::domain::{
    DomainEvent, EventId, EventPublisher, Rank, RecordStore, Reservation, ReservationId,
};
use crate::error::{Error, Result};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Bound on a single-event rebuild query
    pub store_timeout: Duration,
    /// Bound on each bootstrap query
    pub bootstrap_timeout: Duration,
    /// Number of shards of the slot map
    pub shard_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            bootstrap_timeout: Duration::from_secs(30),
            shard_count: DEFAULT_SHARD_COUNT,
        }
    }
}

/// What a write propagation did to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Entry mutated
    Applied,
    /// Duplicate or late propagation; nothing to do
    Ignored,
    /// Key is loading; merged when the fetch is published
    Buffered,
    /// Cancel for a reservation the entry never held
    Unmatched,
    /// Key not cached; the next read rebuilds it from the record store
    NotCached,
}

/// Summary of a bootstrap run
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub events: usize,
    pub entries: usize,
    pub reservations: usize,
    /// Records whose seat is unknown to the catalog or whose event was not listed
    pub skipped: usize,
    pub duration: Duration,
}

/// Active reservations of one event, per rank.
///
/// A rank without reservations maps to an empty list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSnapshot {
    pub event_id: EventId,
    pub entries: BTreeMap<Rank, Vec<Reservation>>,
}

impl EventSnapshot {
    /// Active reservations in a rank (0 when the rank has no entry).
    pub fn count(&self, rank: Rank) -> usize {
        self.entries.get(&rank).map_or(0, Vec::len)
    }

    /// Active reservations across all ranks.
    pub fn total(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// All reservations, rank by rank.
    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.entries.values().flatten()
    }

    pub fn into_reservations(self) -> Vec<Reservation> {
        self.entries.into_values().flatten().collect()
    }
}

/// Rank-scoped availability cache.
pub struct AvailabilityCache {
    catalog: Arc<SeatCatalog>,
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn EventPublisher>,
    slots: ShardedMap<EntryKey, Arc<KeySlot>>,
    config: CacheConfig,
    metrics: CacheMetrics,
    next_token: AtomicU64,
}

impl AvailabilityCache {
    /// Create an empty cache. Call [`bootstrap`](Self::bootstrap) before serving.
    pub fn new(
        config: CacheConfig,
        catalog: Arc<SeatCatalog>,
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            slots: ShardedMap::with_shards(config.shard_count),
            catalog,
            store,
            publisher,
            config,
            metrics: CacheMetrics::new(),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn catalog(&self) -> &Arc<SeatCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    /// Populate every `(event, rank)` key from a full record store scan.
    ///
    /// Replaces each key's contents, so running it again is safe. Nothing is
    /// published if either query fails or times out.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> Result<BootstrapReport> {
        let started = Instant::now();
        let limit = self.config.bootstrap_timeout;
        let token = self.next_token();

        let events = self
            .timed("list events", limit, self.store.list_events())
            .await
            .inspect_err(|e| error!(error = %e, "Bootstrap failed listing events"))?;

        // Install loading slots first so writes racing the scan are buffered.
        let mut installed: Vec<(EntryKey, Arc<KeySlot>)> = Vec::new();
        for event in &events {
            for rank in self.catalog.ranks() {
                let key = EntryKey::new(event.id, rank);
                let carried = self
                    .slots
                    .get(&key)
                    .map(|old| old.tombstones())
                    .unwrap_or_default();
                let slot = Arc::new(KeySlot::loading_with(
                    token,
                    PendingWrites::with_canceled(carried),
                ));
                self.slots.insert(key, Arc::clone(&slot));
                installed.push((key, slot));
            }
        }

        let records = match self
            .timed("scan reservations", limit, self.store.active_reservations())
            .await
        {
            Ok(records) => records,
            Err(e) => {
                self.abandon(token, installed.iter().map(|(key, _)| key));
                self.metrics.record_rebuild_failure();
                error!(error = %e, "Bootstrap failed scanning reservations");
                self.emit(DomainEvent::rebuild_failed("bootstrap", e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let mut grouped: HashMap<EntryKey, Vec<Reservation>> = HashMap::new();
        let mut skipped = 0;
        for record in records.into_iter().filter(Reservation::is_active) {
            let rank = match self.catalog.rank_of(record.seat_id) {
                Ok(rank) => rank,
                Err(e) => {
                    warn!(reservation_id = %record.id, error = %e, "Skipping reservation with unknown seat");
                    skipped += 1;
                    continue;
                }
            };
            grouped
                .entry(EntryKey::new(record.event_id, rank))
                .or_default()
                .push(record);
        }

        let mut reservations = 0;
        for (key, slot) in &installed {
            let fetched = grouped.remove(key).unwrap_or_default();
            let (snapshot, errors) = slot.publish(key, fetched, self.catalog.capacity(key.rank));
            for e in errors {
                self.report_drift(key, None, &e).await;
            }
            reservations += snapshot.len();
        }

        for (key, orphaned) in grouped {
            warn!(
                key = %key,
                count = orphaned.len(),
                "Skipping reservations for an event missing from the event listing"
            );
            skipped += orphaned.len();
        }

        self.metrics.record_bootstrap();
        let report = BootstrapReport {
            events: events.len(),
            entries: installed.len(),
            reservations,
            skipped,
            duration: started.elapsed(),
        };

        info!(
            events = report.events,
            entries = report.entries,
            reservations = report.reservations,
            skipped = report.skipped,
            duration_ms = report.duration.as_millis() as u64,
            "Availability cache bootstrapped"
        );
        self.emit(DomainEvent::BootstrapCompleted {
            events: report.events,
            entries: report.entries,
            reservations: report.reservations,
            duration_ms: report.duration.as_millis() as u64,
            timestamp: chrono::Utc::now(),
        })
        .await;

        Ok(report)
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Propagate a reservation the record store just accepted.
    ///
    /// Fails with `SeatNotFound` for a seat the catalog does not know, without
    /// touching the cache. An `Inconsistency` error means the entry has
    /// drifted from the record store and should be rebuilt.
    #[instrument(skip(self, reservation), fields(event_id = %event_id, reservation_id = %reservation.id))]
    pub async fn record_created(
        &self,
        event_id: EventId,
        reservation: Reservation,
    ) -> Result<WriteOutcome> {
        let rank = self.catalog.rank_of(reservation.seat_id)?;
        let key = EntryKey::new(event_id, rank);

        if reservation.event_id != event_id {
            return Err(Error::Inconsistency {
                key: key.storage_key(),
                reason: format!(
                    "reservation {} belongs to event {}",
                    reservation.id, reservation.event_id
                ),
            });
        }
        if !reservation.is_active() {
            debug!("Created record is already canceled, applying as cancel");
            return self
                .record_canceled(event_id, reservation.id, Some(rank))
                .await;
        }

        let Some(slot) = self.slots.get(&key) else {
            self.metrics.record_deferred();
            debug!(key = %key, "Key not cached, next read rebuilds it");
            return Ok(WriteOutcome::NotCached);
        };

        let capacity = self.catalog.capacity(rank);
        let outcome = slot.with_state(|state| match state {
            SlotState::Loading { pending, .. } => {
                pending.push_created(reservation);
                Ok(WriteOutcome::Buffered)
            }
            SlotState::Ready(entry) => {
                entry
                    .append(&key, reservation, capacity)
                    .map(|outcome| match outcome {
                        AppendOutcome::Appended => WriteOutcome::Applied,
                        AppendOutcome::Duplicate | AppendOutcome::Stale => WriteOutcome::Ignored,
                    })
            }
        })?;

        match outcome {
            WriteOutcome::Applied => self.metrics.record_append(),
            WriteOutcome::Buffered => self.metrics.record_buffered(),
            _ => self.metrics.record_duplicate(),
        }
        debug!(key = %key, ?outcome, "Propagated reservation");
        Ok(outcome)
    }

    /// Propagate a cancel the record store just accepted.
    ///
    /// Removes at most one reservation, matched by id. Without a rank the
    /// rank holding the id is looked up first; only that entry records the
    /// cancel. A cancel for an id the entry never held is logged as an
    /// inconsistency and otherwise ignored.
    #[instrument(skip(self), fields(event_id = %event_id, reservation_id = %reservation_id))]
    pub async fn record_canceled(
        &self,
        event_id: EventId,
        reservation_id: ReservationId,
        rank: Option<Rank>,
    ) -> Result<WriteOutcome> {
        let mut buffered = false;
        let mut duplicate = false;
        let mut absent = false;
        let mut unmatched: Option<EntryKey> = None;
        let resolved = rank.or_else(|| self.resolve_rank(event_id, reservation_id));

        for rank in self.ranks_for(resolved) {
            let key = EntryKey::new(event_id, rank);
            let Some(slot) = self.slots.get(&key) else {
                absent = true;
                continue;
            };

            let removed = slot.with_state(|state| match state {
                SlotState::Loading { pending, .. } => {
                    pending.push_canceled(reservation_id);
                    None
                }
                SlotState::Ready(entry) if resolved.is_some() => {
                    Some(entry.remove(reservation_id))
                }
                SlotState::Ready(_) => Some(RemoveOutcome::Unknown),
            });

            match removed {
                Some(RemoveOutcome::Removed) => {
                    self.metrics.record_removal();
                    debug!(key = %key, "Removed reservation");
                    return Ok(WriteOutcome::Applied);
                }
                Some(RemoveOutcome::AlreadyCanceled) => duplicate = true,
                Some(RemoveOutcome::Unknown) => {
                    unmatched.get_or_insert(key);
                }
                None => buffered = true,
            }
        }

        if buffered {
            self.metrics.record_buffered();
            return Ok(WriteOutcome::Buffered);
        }
        if duplicate {
            self.metrics.record_duplicate();
            return Ok(WriteOutcome::Ignored);
        }
        match unmatched {
            Some(key) if !absent => {
                let e = Error::Inconsistency {
                    key: key.storage_key(),
                    reason: "cancel for a reservation absent from the entry".to_string(),
                };
                self.report_drift(&key, Some(reservation_id), &e).await;
                Ok(WriteOutcome::Unmatched)
            }
            _ => {
                self.metrics.record_deferred();
                Ok(WriteOutcome::NotCached)
            }
        }
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Active reservations for an event, or for one rank of it.
    ///
    /// Missing keys are rebuilt from the record store; a failed rebuild is
    /// returned to the caller rather than served as an empty list.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn list(&self, event_id: EventId, rank: Option<Rank>) -> Result<Vec<Reservation>> {
        let snapshot = self.collect(event_id, self.ranks_for(rank)).await?;
        Ok(snapshot.into_reservations())
    }

    /// Number of active reservations; always `list(..).len()`.
    pub async fn count(&self, event_id: EventId, rank: Option<Rank>) -> Result<usize> {
        let mut total = 0;
        let mut missing = Vec::new();
        for rank in self.ranks_for(rank) {
            let key = EntryKey::new(event_id, rank);
            match self.slots.get(&key).and_then(|slot| slot.read(Entry::len)) {
                Some(len) => {
                    self.metrics.record_hit();
                    total += len;
                }
                None => {
                    self.metrics.record_miss();
                    missing.push(rank);
                }
            }
        }
        if !missing.is_empty() {
            total += self
                .load(event_id, &missing)
                .await?
                .values()
                .map(Vec::len)
                .sum::<usize>();
        }
        Ok(total)
    }

    /// Snapshot of every rank of an event, for the projector.
    pub async fn snapshot(&self, event_id: EventId) -> Result<EventSnapshot> {
        self.collect(event_id, self.catalog.ranks().collect()).await
    }

    async fn collect(&self, event_id: EventId, ranks: Vec<Rank>) -> Result<EventSnapshot> {
        let mut entries = BTreeMap::new();
        let mut missing = Vec::new();

        for rank in ranks {
            let key = EntryKey::new(event_id, rank);
            match self
                .slots
                .get(&key)
                .and_then(|slot| slot.read(Entry::snapshot))
            {
                Some(reservations) => {
                    self.metrics.record_hit();
                    entries.insert(rank, reservations);
                }
                None => {
                    self.metrics.record_miss();
                    missing.push(rank);
                }
            }
        }

        if !missing.is_empty() {
            entries.extend(self.load(event_id, &missing).await?);
        }

        Ok(EventSnapshot { event_id, entries })
    }

    // =========================================================================
    // Rebuild
    // =========================================================================

    /// Drop cached entries of an event (or one rank of it).
    pub fn invalidate(&self, event_id: EventId, rank: Option<Rank>) -> usize {
        self.ranks_for(rank)
            .into_iter()
            .filter(|rank| self.slots.remove(&EntryKey::new(event_id, *rank)).is_some())
            .count()
    }

    /// Discard and reload every rank of an event.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn rebuild(&self, event_id: EventId) -> Result<EventSnapshot> {
        self.invalidate(event_id, None);
        let ranks: Vec<Rank> = self.catalog.ranks().collect();
        let entries = self.load(event_id, &ranks).await?;
        Ok(EventSnapshot { event_id, entries })
    }

    /// Fill the given ranks of an event from one scoped record store query.
    async fn load(
        &self,
        event_id: EventId,
        ranks: &[Rank],
    ) -> Result<BTreeMap<Rank, Vec<Reservation>>> {
        let started = Instant::now();
        let token = self.next_token();
        let mut out = BTreeMap::new();
        let mut waiting = Vec::new();

        for &rank in ranks {
            let key = EntryKey::new(event_id, rank);
            let (slot, _) = self
                .slots
                .get_or_insert_with(key, || Arc::new(KeySlot::loading(token)));
            match slot.read(Entry::snapshot) {
                Some(reservations) => {
                    out.insert(rank, reservations);
                }
                None => waiting.push((key, slot)),
            }
        }

        if waiting.is_empty() {
            return Ok(out);
        }

        let records = match self.fetch_event(event_id).await {
            Ok(records) => records,
            Err(e) if e.is_not_found() => {
                self.abandon(token, waiting.iter().map(|(key, _)| key));
                debug!(event_id = %event_id, "Event unknown to record store, nothing cached");
                return Err(e);
            }
            Err(e) => {
                self.abandon(token, waiting.iter().map(|(key, _)| key));
                self.metrics.record_rebuild_failure();
                warn!(event_id = %event_id, error = %e, "Rebuild from record store failed");
                for (key, _) in &waiting {
                    self.emit(DomainEvent::rebuild_failed(key.storage_key(), e.to_string()))
                        .await;
                }
                return Err(e);
            }
        };

        let mut grouped: HashMap<Rank, Vec<Reservation>> = HashMap::new();
        for record in records {
            if record.event_id != event_id || !record.is_active() {
                continue;
            }
            match self.catalog.rank_of(record.seat_id) {
                Ok(rank) => grouped.entry(rank).or_default().push(record),
                Err(e) => {
                    warn!(reservation_id = %record.id, error = %e, "Skipping reservation with unknown seat")
                }
            }
        }

        for (key, slot) in waiting {
            let fetched = grouped.remove(&key.rank).unwrap_or_default();
            let (snapshot, errors) =
                slot.publish(&key, fetched, self.catalog.capacity(key.rank));
            for e in errors {
                self.report_drift(&key, None, &e).await;
            }

            self.metrics.record_rebuild(started.elapsed());
            debug!(key = %key, reservations = snapshot.len(), "Rebuilt entry");
            self.emit(DomainEvent::entry_rebuilt(key.storage_key(), snapshot.len()))
                .await;
            out.insert(key.rank, snapshot);
        }

        Ok(out)
    }

    /// Scoped record store query for one event.
    ///
    /// An empty scan is confirmed against the event table so that unknown
    /// events fail with `EventNotFound` instead of caching empty entries.
    async fn fetch_event(&self, event_id: EventId) -> Result<Vec<Reservation>> {
        let records = self
            .timed(
                "event scan",
                self.config.store_timeout,
                self.store.active_reservations_for_event(event_id),
            )
            .await?;
        if records.is_empty() {
            self.timed(
                "event lookup",
                self.config.store_timeout,
                self.store.get_event(event_id),
            )
            .await?
            .ok_or(Error::EventNotFound(event_id.get()))?;
        }
        Ok(records)
    }

    /// Remove slots still loading under `token`.
    fn abandon<'a>(&self, token: u64, keys: impl Iterator<Item = &'a EntryKey>) {
        for key in keys {
            self.slots.remove_if(key, |slot| slot.is_loading_with(token));
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Check if a key currently has a published entry.
    pub fn is_cached(&self, event_id: EventId, rank: Rank) -> bool {
        self.slots
            .get(&EntryKey::new(event_id, rank))
            .and_then(|slot| slot.read(|_| ()))
            .is_some()
    }

    /// Keys currently held, sorted.
    pub fn cached_keys(&self) -> Vec<EntryKey> {
        let mut keys = self.slots.keys();
        keys.sort();
        keys
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Get metrics snapshot
    pub fn stats(&self) -> MetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        snapshot.entries = self.slots.len();
        snapshot
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn ranks_for(&self, rank: Option<Rank>) -> Vec<Rank> {
        match rank {
            Some(rank) if self.catalog.has_rank(rank) => vec![rank],
            Some(_) => Vec::new(),
            None => self.catalog.ranks().collect(),
        }
    }

    /// Rank whose published entry holds or has canceled `id`.
    fn resolve_rank(&self, event_id: EventId, id: ReservationId) -> Option<Rank> {
        self.catalog.ranks().find(|rank| {
            self.slots
                .get(&EntryKey::new(event_id, *rank))
                .and_then(|slot| slot.read(|entry| entry.contains(id) || entry.is_canceled(id)))
                .unwrap_or(false)
        })
    }

    fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        limit: Duration,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation,
                duration: limit,
            }),
        }
    }

    async fn report_drift(&self, key: &EntryKey, reservation_id: Option<ReservationId>, e: &Error) {
        self.metrics.record_inconsistency();
        warn!(
            key = %key,
            reservation_id = reservation_id.map(ReservationId::get),
            error = %e,
            "Cache inconsistency detected"
        );
        self.emit(DomainEvent::inconsistency(
            key.storage_key(),
            reservation_id.map_or(0, ReservationId::get),
            e.to_string(),
        ))
        .await;
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
