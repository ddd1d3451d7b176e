//! Event Metadata Cache
//!
//! Time-boxed cache of descriptive event fields (title, visibility, price).
//! Metadata may lag the record store by up to the configured TTL; an
//! expired entry is refetched transparently on the next read.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, instrument};

use crate::domain::{EventId, EventRecord, RecordStore};
use crate::error::{Error, Result};

/// Default staleness window
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
struct Timed<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Timed<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct MetadataStats {
    pub cached_events: usize,
    pub expired_events: usize,
    pub listing_cached: bool,
}

/// TTL cache of event records
pub struct EventMetadataCache {
    store: Arc<dyn RecordStore>,
    ttl: Duration,
    timeout: Duration,
    events: DashMap<EventId, Timed<EventRecord>>,
    listing: RwLock<Option<Timed<Vec<EventRecord>>>>,
}

impl EventMetadataCache {
    pub fn new(store: Arc<dyn RecordStore>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            store,
            ttl,
            timeout,
            events: DashMap::new(),
            listing: RwLock::new(None),
        }
    }

    /// Staleness bound of this cache.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get one event, refetching when missing or expired.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn get(&self, event_id: EventId) -> Result<EventRecord> {
        if let Some(entry) = self.events.get(&event_id) {
            if !entry.is_expired() {
                return Ok(entry.value.clone());
            }
        }

        debug!("Event metadata miss, fetching from record store");
        let record = tokio::time::timeout(self.timeout, self.store.get_event(event_id))
            .await
            .map_err(|_| Error::Timeout {
                operation: "get event",
                duration: self.timeout,
            })??
            .ok_or(Error::EventNotFound(event_id.get()))?;

        self.events
            .insert(event_id, Timed::new(record.clone(), self.ttl));
        Ok(record)
    }

    /// All events sorted by id, refetching when the listing expired.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<EventRecord>> {
        if let Some(listing) = self.listing.read().as_ref() {
            if !listing.is_expired() {
                return Ok(listing.value.clone());
            }
        }

        debug!("Event listing expired, fetching from record store");
        let mut records = tokio::time::timeout(self.timeout, self.store.list_events())
            .await
            .map_err(|_| Error::Timeout {
                operation: "list events",
                duration: self.timeout,
            })??;
        records.sort_by_key(|r| r.id);

        for record in &records {
            self.events
                .insert(record.id, Timed::new(record.clone(), self.ttl));
        }
        *self.listing.write() = Some(Timed::new(records.clone(), self.ttl));
        Ok(records)
    }

    /// Forget an event; the next read refetches it.
    ///
    /// Used when a record store write shows the cached record is stale.
    pub fn invalidate(&self, event_id: EventId) {
        self.events.remove(&event_id);
        *self.listing.write() = None;
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) -> usize {
        let before = self.events.len();
        self.events.retain(|_, entry| !entry.is_expired());
        before - self.events.len()
    }

    pub fn stats(&self) -> MetadataStats {
        MetadataStats {
            cached_events: self.events.len(),
            expired_events: self.events.iter().filter(|e| e.is_expired()).count(),
            listing_cached: self
                .listing
                .read()
                .as_ref()
                .is_some_and(|l| !l.is_expired()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
