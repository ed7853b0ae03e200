//! TileCache - disk-backed cache for raster tiles
//!
//! Holds the pixel buffers of large tiled rasters under a fixed memory budget.
//! Each tile lives in its own backing file; the most recently accessed tiles
//! are also kept in memory, and writers check tiles out exclusively.
//!
//! ```
//! use tilecache::cache::{ElementType, OwnerId, SampleLayout, TileBuffer, TileCache, TileOwner};
//! use tilecache::config::{ResidencyPolicy, TileCacheConfig};
//!
//! let dir = tempfile::TempDir::new().unwrap();
//! let config = TileCacheConfig::new()
//!     .with_spill_dir(dir.path())
//!     .with_memory_capacity(2 * 64)
//!     .with_residency(ResidencyPolicy::Always);
//! let cache = TileCache::new(config).unwrap();
//!
//! let owner = TileOwner::new(OwnerId::Numeric(7), SampleLayout::new(ElementType::U8, 1, 64), 8, 8);
//! for x in 0..3 {
//!     cache.add(&owner, x, 0, TileBuffer::from_samples(vec![x as u8; 64]), None).unwrap();
//! }
//! assert_eq!(cache.resident_count(), 2);
//!
//! let handle = cache.checkout(&owner, 0, 0).unwrap().unwrap();
//! handle.write().unwrap().bank_mut::<u8>(0).unwrap()[0] = 255;
//! assert!(cache.release_handle(handle).unwrap().is_released());
//! ```

pub mod cache;
pub mod config;
pub mod log;
pub mod logging;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
