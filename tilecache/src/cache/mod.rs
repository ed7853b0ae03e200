//! Tile cache with disk spillover.
//!
//! Every tile added to the cache is written to its own backing file in the
//! spill directory and, subject to the residency policy and memory budget,
//! kept in memory as well. Resident tiles are evicted least recently accessed
//! first; evicted tiles are reloaded from disk on the next access. Writers
//! take exclusive checkouts that pin a tile in memory until released; every
//! other caller gets a read-only [`TileView`].

mod buffer;
mod checkout;
mod codec;
mod daemon;
mod eviction;
mod events;
mod key;
mod owner;
mod record;
mod residency;
mod shared;
mod spill;
mod stats;
mod system;
mod types;

pub use buffer::{Banks, ElementType, Sample, SampleLayout, TileBuffer};
pub use checkout::{ReleaseOutcome, TileWriteHandle};
pub use codec::TileCodec;
pub use daemon::MemoryControlDaemon;
pub use eviction::{
    plan_admission, plan_reclaim, plan_trim, AdmitMode, Admission, Candidate, EvictionPlan,
};
pub use events::{TileEvent, TileEventReceiver};
pub use key::{compute_key, TileKey};
pub use owner::{Liveness, OwnerId, OwnerLease, TileOwner};
pub use record::{TileRecord, TileRecordSnapshot, TileState};
pub use shared::SharedCache;
pub use spill::SpillDirectory;
pub use stats::{CacheStatistics, CacheStats};
pub use system::TileCache;
pub use types::{CacheError, TileView};
