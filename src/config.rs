//! Service Configuration
//!
//! Optional YAML file describing timeouts, the metadata staleness window and
//! the venue layout. Every field has a default, so an empty file (or no file)
//! yields the standard 1000-seat venue.
//!
//! ```yaml
//! store_timeout_ms: 2000
//! bootstrap_timeout_secs: 30
//! metadata_ttl_secs: 120
//! shard_count: 64
//! seats:
//!   - { rank: S, capacity: 50, price_offset: 5000 }
//!   - { rank: A, capacity: 150, price_offset: 3000 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::availability::{CacheConfig, DEFAULT_METADATA_TTL, DEFAULT_SHARD_COUNT};
use crate::catalog::{default_layout, RankLayout, SeatCatalog};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration of the availability service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Bound on single-event record store queries and writes
    pub store_timeout_ms: u64,

    /// Bound on each bootstrap query
    pub bootstrap_timeout_secs: u64,

    /// Staleness window of the event metadata cache
    pub metadata_ttl_secs: u64,

    /// Number of shards of the availability cache (power of two)
    pub shard_count: usize,

    /// Venue layout, ranks in seat-id order
    pub seats: Vec<RankLayout>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 2000,
            bootstrap_timeout_secs: 30,
            metadata_ttl_secs: DEFAULT_METADATA_TTL.as_secs(),
            shard_count: DEFAULT_SHARD_COUNT,
            seats: default_layout(),
        }
    }
}

impl ServiceConfig {
    /// Load and validate a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML configuration.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.store_timeout_ms == 0 {
            return Err(Error::Config("store_timeout_ms must be > 0".into()));
        }
        if self.bootstrap_timeout_secs == 0 {
            return Err(Error::Config("bootstrap_timeout_secs must be > 0".into()));
        }
        if self.metadata_ttl_secs == 0 {
            return Err(Error::Config("metadata_ttl_secs must be > 0".into()));
        }
        if self.shard_count == 0 || !self.shard_count.is_power_of_two() {
            return Err(Error::Config(
                "shard_count must be a power of 2".into(),
            ));
        }
        SeatCatalog::from_layout(self.seats.clone()).map(|_| ())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    /// Availability cache settings.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            store_timeout: self.store_timeout(),
            bootstrap_timeout: self.bootstrap_timeout(),
            shard_count: self.shard_count,
        }
    }

    /// Build the seat catalog from the configured layout.
    pub fn catalog(&self) -> Result<SeatCatalog> {
        SeatCatalog::from_layout(self.seats.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
