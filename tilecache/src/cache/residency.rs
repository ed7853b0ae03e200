//! Capacity-bounded table of in-memory tile buffers.
//!
//! A slot holds its buffer through a reclaimable reference: memory pressure
//! may empty the slot at any time. Usage accounting follows the cache's own
//! admissions and evictions only, so an emptied slot still counts until the
//! cache notices it and removes the entry.

use crate::cache::key::TileKey;
use crate::cache::types::SharedTile;
use std::collections::HashMap;

#[derive(Debug)]
struct ResidentEntry {
    buffer: Option<SharedTile>,
    byte_size: u64,
}

/// Outcome of looking up a key.
#[derive(Debug)]
pub enum Lookup {
    Live(SharedTile),
    /// Entry exists but its buffer was reclaimed.
    Vanished,
    Absent,
}

/// Resident buffers keyed by tile, with byte accounting against a capacity.
#[derive(Debug)]
pub struct ResidencyStore {
    entries: HashMap<TileKey, ResidentEntry>,
    usage: u64,
    capacity: u64,
}

impl ResidencyStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: HashMap::new(),
            usage: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: u64) {
        self.capacity = capacity;
    }

    /// Bytes admitted and not yet evicted.
    pub fn usage(&self) -> u64 {
        self.usage
    }

    pub fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.usage)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if the entry exists and its buffer has not been reclaimed.
    pub fn is_live(&self, key: &TileKey) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.buffer.is_some())
    }

    pub fn lookup(&self, key: &TileKey) -> Lookup {
        match self.entries.get(key) {
            Some(ResidentEntry {
                buffer: Some(buffer),
                ..
            }) => Lookup::Live(SharedTile::clone(buffer)),
            Some(_) => Lookup::Vanished,
            None => Lookup::Absent,
        }
    }

    /// Bytes accounted to `key`, live or not.
    pub fn byte_size_of(&self, key: &TileKey) -> Option<u64> {
        self.entries.get(key).map(|entry| entry.byte_size)
    }

    /// Admit `buffer`. Capacity is enforced by the caller's eviction plan.
    pub fn insert(&mut self, key: TileKey, buffer: SharedTile, byte_size: u64) {
        let previous = self.entries.insert(
            key,
            ResidentEntry {
                buffer: Some(buffer),
                byte_size,
            },
        );
        if let Some(previous) = previous {
            self.usage -= previous.byte_size;
        }
        self.usage += byte_size;
    }

    /// Drop the entry and its accounting. Returns the freed byte count.
    pub fn remove(&mut self, key: &TileKey) -> Option<u64> {
        let entry = self.entries.remove(key)?;
        self.usage -= entry.byte_size;
        Some(entry.byte_size)
    }

    /// Empty the slot without touching accounting.
    ///
    /// Returns `false` if there was no live buffer to drop.
    pub fn reclaim(&mut self, key: &TileKey) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => entry.buffer.take().is_some(),
            None => false,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &TileKey> {
        self.entries.keys()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.usage = 0;
    }
}
