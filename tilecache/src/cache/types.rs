//! Shared cache types and the error taxonomy.

use crate::cache::buffer::{SampleLayout, TileBuffer};
use crate::cache::key::TileKey;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;
use thiserror::Error;

/// A tile buffer shared between the cache, its readers and one writer.
///
/// Only [`crate::cache::TileWriteHandle`] takes the write lock. The cache
/// itself never waits on this lock while holding its own.
pub(crate) type SharedTile = Arc<RwLock<TileBuffer>>;

/// Read-only access to a cached tile buffer.
///
/// A view keeps the buffer alive after the tile is evicted, but it may then
/// no longer reflect the cache. Modifying a tile requires a checkout:
///
/// ```compile_fail
/// fn edit(view: &tilecache::cache::TileView) {
///     view.write();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TileView {
    tile: SharedTile,
}

impl TileView {
    pub(crate) fn new(tile: SharedTile) -> Self {
        Self { tile }
    }

    /// Shared read lock on the buffer. Blocks while a writer holds it.
    pub fn read(&self) -> RwLockReadGuard<'_, TileBuffer> {
        self.tile.read()
    }

    /// Owned copy of the current contents.
    pub fn snapshot(&self) -> TileBuffer {
        self.tile.read().clone()
    }

    /// True if both views refer to the same in-memory buffer.
    pub fn same_buffer(&self, other: &TileView) -> bool {
        Arc::ptr_eq(&self.tile, &other.tile)
    }
}

/// Errors surfaced to the immediate caller. Cache misses are not errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Writing or reading a backing file failed.
    #[error("Tile cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A tile cannot be made resident even after evicting every evictable tile.
    #[error(
        "Tile needs {required} bytes but capacity is {capacity} bytes \
         ({evictable} bytes evictable)"
    )]
    CapacityExceeded {
        required: u64,
        capacity: u64,
        evictable: u64,
    },

    /// A buffer does not match the element layout declared by its owner.
    #[error("Tile layout mismatch: owner declares {expected}, buffer has {actual}")]
    LayoutMismatch {
        expected: SampleLayout,
        actual: SampleLayout,
    },

    /// A backing file does not hold the number of bytes its layout implies.
    #[error("Backing file holds {actual} bytes, layout requires {expected}")]
    CorruptBacking { expected: u64, actual: u64 },

    /// A buffer was built from banks of unequal length or no banks at all.
    #[error("Invalid tile buffer: {0}")]
    InvalidBuffer(String),

    #[error("Invalid tile cache configuration: {0}")]
    InvalidConfig(String),

    /// The checkout behind a write handle was released or the tile removed.
    #[error("Checkout of tile {0} is no longer held")]
    CheckoutReleased(TileKey),
}

impl CacheError {
    /// True for the capacity failure that aborts `add`/`get`/`checkout`.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, CacheError::CapacityExceeded { .. })
    }
}
