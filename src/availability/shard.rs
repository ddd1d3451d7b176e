//! Sharded Map Implementation
//!
//! Concurrent hashmap split into power-of-two shards, each behind its own
//! `RwLock`. The availability cache stores one `Arc`'d slot per key here;
//! the shard lock is only held to look a slot up or swap it, never while a
//! slot's contents are mutated.

use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of shards
pub const DEFAULT_SHARD_COUNT: usize = 64;

/// Single shard containing a hashmap and access statistics
pub struct Shard<K, V> {
    map: RwLock<HashMap<K, V>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Shard<K, V> {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Get the number of entries in this shard
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Check if the shard is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get read count
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Get write count
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

/// Sharded map with a runtime shard count
pub struct ShardedMap<K, V> {
    shards: Box<[Shard<K, V>]>,
    mask: usize,
}

impl<K, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARD_COUNT)
    }
}

impl<K, V> ShardedMap<K, V> {
    /// Create a map with `count` shards, rounded up to a power of two.
    pub fn with_shards(count: usize) -> Self {
        let count = count.max(1).next_power_of_two();
        let shards: Vec<Shard<K, V>> = (0..count).map(|_| Shard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
            mask: count - 1,
        }
    }

    /// Get the shard count
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Get total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Get total read count
    pub fn total_reads(&self) -> u64 {
        self.shards.iter().map(|s| s.read_count()).sum()
    }

    /// Get total write count
    pub fn total_writes(&self) -> u64 {
        self.shards.iter().map(|s| s.write_count()).sum()
    }

    /// Clear all shards
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.writes.fetch_add(1, Ordering::Relaxed);
            shard.map.write().clear();
        }
    }
}

impl<K: Eq + Hash, V: Clone> ShardedMap<K, V> {
    #[inline]
    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & self.mask]
    }

    /// Get a value
    pub fn get(&self, key: &K) -> Option<V> {
        let shard = self.shard_for(key);
        shard.reads.fetch_add(1, Ordering::Relaxed);
        shard.map.read().get(key).cloned()
    }

    /// Check if a key exists
    pub fn contains_key(&self, key: &K) -> bool {
        let shard = self.shard_for(key);
        shard.reads.fetch_add(1, Ordering::Relaxed);
        shard.map.read().contains_key(key)
    }

    /// Insert a value, returning the old value if present
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let shard = self.shard_for(&key);
        shard.writes.fetch_add(1, Ordering::Relaxed);
        shard.map.write().insert(key, value)
    }

    /// Remove a value, returning it if present
    pub fn remove(&self, key: &K) -> Option<V> {
        let shard = self.shard_for(key);
        shard.writes.fetch_add(1, Ordering::Relaxed);
        shard.map.write().remove(key)
    }

    /// Remove a value only if `pred` holds for it
    pub fn remove_if<F>(&self, key: &K, pred: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        let shard = self.shard_for(key);
        shard.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = shard.map.write();
        if guard.get(key).is_some_and(pred) {
            guard.remove(key)
        } else {
            None
        }
    }

    /// Get the existing value or insert one built by `f`.
    ///
    /// Returns the value and whether this call inserted it.
    pub fn get_or_insert_with<F>(&self, key: K, f: F) -> (V, bool)
    where
        F: FnOnce() -> V,
    {
        let shard = self.shard_for(&key);

        // Try read first
        shard.reads.fetch_add(1, Ordering::Relaxed);
        if let Some(v) = shard.map.read().get(&key) {
            return (v.clone(), false);
        }

        shard.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = shard.map.write();

        // Double-check under write lock
        if let Some(v) = guard.get(&key) {
            return (v.clone(), false);
        }

        let value = f();
        guard.insert(key, value.clone());
        (value, true)
    }

    /// Get all keys
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.shards
            .iter()
            .flat_map(|s| s.map.read().keys().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Get all entries
    pub fn entries(&self) -> Vec<(K, V)>
    where
        K: Clone,
    {
        self.shards
            .iter()
            .flat_map(|s| {
                s.map
                    .read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Statistics for a sharded map
#[derive(Debug, Clone)]
pub struct ShardedMapStats {
    pub total_entries: usize,
    pub total_reads: u64,
    pub total_writes: u64,
    pub shard_entry_counts: Vec<usize>,
}

impl<K, V> ShardedMap<K, V> {
    /// Get detailed statistics
    pub fn stats(&self) -> ShardedMapStats {
        let shard_entry_counts: Vec<usize> = self.shards.iter().map(|s| s.len()).collect();
        ShardedMapStats {
            total_entries: shard_entry_counts.iter().sum(),
            total_reads: self.total_reads(),
            total_writes: self.total_writes(),
            shard_entry_counts,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
