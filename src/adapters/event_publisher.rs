//! Event Publisher Adapters
//!
//! `LoggingEventPublisher` turns domain events into structured log lines;
//! `InMemoryEventCollector` keeps them for assertions.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Writes each event to the log, keyed by the cache entry it concerns.
///
/// Cache-health warnings (failed or scheduled rebuilds, inconsistencies)
/// always log at warn; routine events at info when `verbose`, else debug.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventPublisher {
    verbose: bool,
}

impl LoggingEventPublisher {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let event_type = event.event_type();
        let key = event.key().unwrap_or("-");
        let body = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        if event.is_warning() {
            warn!(event_type, key, event = %body, "Cache health event");
        } else if self.verbose {
            info!(event_type, key, event = %body, "Cache event");
        } else {
            debug!(event_type, key, event = %body, "Cache event");
        }
        Ok(())
    }
}

/// Keeps every published event in arrival order.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: RwLock<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Events with the given `event_type()` name.
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Events recorded against one cache entry.
    pub fn events_for_key(&self, key: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.key() == Some(key))
            .cloned()
            .collect()
    }

    /// Number of cache-health warnings seen.
    pub fn warnings(&self) -> usize {
        self.events.read().iter().filter(|e| e.is_warning()).count()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        self.events.write().extend(events);
        Ok(())
    }
}
