//! Owning rasters, as seen by the cache.
//!
//! The cache never holds a raster alive. It stores the owner's [`OwnerId`]
//! and a [`Liveness`] check instead of a pointer back to the raster. A raster
//! typically keeps an [`OwnerLease`] for its whole lifetime; dropping the
//! lease turns every tile record of that raster into an orphan.

use crate::cache::buffer::SampleLayout;
use crate::cache::key::{compute_key, TileKey};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Unique identifier of an owning raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnerId {
    /// Explicit numeric identifier.
    Numeric(u64),
    /// SHA-256 of identity bytes, for owners without a numeric id.
    Digest([u8; 32]),
}

impl OwnerId {
    /// Derive a digest identifier from arbitrary identity bytes.
    pub fn from_identity_bytes(bytes: &[u8]) -> Self {
        OwnerId::Digest(Sha256::digest(bytes).into())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerId::Numeric(id) => write!(f, "owner:{:x}", id),
            OwnerId::Digest(digest) => {
                f.write_str("digest:")?;
                for byte in &digest[..6] {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// Reports whether an owner still exists.
#[derive(Clone)]
pub struct Liveness(Arc<dyn Fn() -> bool + Send + Sync>);

impl Liveness {
    /// An owner that never dies.
    pub fn always() -> Self {
        Self(Arc::new(|| true))
    }

    pub fn from_fn(check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(check))
    }

    pub fn is_alive(&self) -> bool {
        (self.0)()
    }
}

impl fmt::Debug for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Liveness").field(&self.is_alive()).finish()
    }
}

/// Token held by a raster; the owner is dead once the lease is dropped.
#[derive(Debug)]
pub struct OwnerLease {
    alive: Arc<AtomicBool>,
}

impl OwnerLease {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Check that flips to dead when this lease drops.
    pub fn liveness(&self) -> Liveness {
        let alive = Arc::clone(&self.alive);
        Liveness::from_fn(move || alive.load(Ordering::Acquire))
    }
}

impl Default for OwnerLease {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OwnerLease {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

/// Description of an owning raster: identity, tile layout and tile grid.
#[derive(Debug, Clone)]
pub struct TileOwner {
    id: OwnerId,
    layout: SampleLayout,
    tile_width: u32,
    tile_height: u32,
    grid_origin: (i64, i64),
    liveness: Liveness,
}

impl TileOwner {
    /// Owner whose tiles are `tile_width` x `tile_height` pixels laid out as `layout`.
    pub fn new(id: OwnerId, layout: SampleLayout, tile_width: u32, tile_height: u32) -> Self {
        Self {
            id,
            layout,
            tile_width,
            tile_height,
            grid_origin: (0, 0),
            liveness: Liveness::always(),
        }
    }

    /// Pixel position of tile (0, 0).
    pub fn with_grid_origin(mut self, x: i64, y: i64) -> Self {
        self.grid_origin = (x, y);
        self
    }

    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Key of tile (`grid_x`, `grid_y`).
    pub fn key(&self, grid_x: i32, grid_y: i32) -> TileKey {
        compute_key(&self.id, grid_x, grid_y)
    }

    /// Pixel-space top-left corner of tile (`grid_x`, `grid_y`).
    pub fn tile_origin(&self, grid_x: i32, grid_y: i32) -> (i64, i64) {
        (
            self.grid_origin.0 + grid_x as i64 * self.tile_width as i64,
            self.grid_origin.1 + grid_y as i64 * self.tile_height as i64,
        )
    }
}
