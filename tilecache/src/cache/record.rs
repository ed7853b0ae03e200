//! Tile records: the persistent metadata of every cached tile.

use crate::cache::buffer::SampleLayout;
use crate::cache::key::TileKey;
use crate::cache::owner::{Liveness, OwnerId, TileOwner};
use crate::cache::spill::BackingFile;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Last lifecycle transition of a tile. Observational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileState {
    /// Added and left non-resident.
    Added,
    /// Added and admitted to memory.
    AddedResident,
    /// Made resident by a reload.
    Resident,
    /// Evicted from memory; the backing file remains.
    NonResident,
    /// Record and backing file deleted.
    Removed,
    /// Served or updated while resident.
    Accessed,
    /// In-memory buffer dropped under memory pressure.
    GarbageReclaimed,
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TileState::Added => "added",
            TileState::AddedResident => "added-resident",
            TileState::Resident => "resident",
            TileState::NonResident => "non-resident",
            TileState::Removed => "removed",
            TileState::Accessed => "accessed",
            TileState::GarbageReclaimed => "reclaimed",
        };
        f.write_str(s)
    }
}

/// Registry entry for one tile. Exists from `add` until removal,
/// independent of residency.
#[derive(Debug)]
pub struct TileRecord {
    key: TileKey,
    owner: OwnerId,
    liveness: Liveness,
    grid: (i32, i32),
    origin: (i64, i64),
    layout: SampleLayout,
    pub(crate) writable: bool,
    pub(crate) metric: Option<i64>,
    pub(crate) last_access: Instant,
    /// Monotonic access stamp; eviction order is by this, then by key.
    pub(crate) access_stamp: u64,
    pub(crate) state: TileState,
    backing: BackingFile,
}

impl TileRecord {
    pub(crate) fn new(
        owner: &TileOwner,
        grid_x: i32,
        grid_y: i32,
        backing: BackingFile,
        metric: Option<i64>,
        access_stamp: u64,
    ) -> Self {
        Self {
            key: owner.key(grid_x, grid_y),
            owner: owner.id(),
            liveness: owner.liveness().clone(),
            grid: (grid_x, grid_y),
            origin: owner.tile_origin(grid_x, grid_y),
            layout: owner.layout(),
            writable: false,
            metric,
            last_access: Instant::now(),
            access_stamp,
            state: TileState::Added,
            backing,
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// True once the owning raster is gone.
    pub fn is_orphaned(&self) -> bool {
        !self.liveness.is_alive()
    }

    pub fn grid(&self) -> (i32, i32) {
        self.grid
    }

    pub fn origin(&self) -> (i64, i64) {
        self.origin
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    pub fn byte_size(&self) -> u64 {
        self.layout.byte_size()
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn backing_path(&self) -> &Path {
        self.backing.path()
    }

    pub(crate) fn touch(&mut self, stamp: u64, state: TileState) {
        self.last_access = Instant::now();
        self.access_stamp = stamp;
        self.state = state;
    }

    pub(crate) fn into_backing(self) -> BackingFile {
        self.backing
    }

    pub fn snapshot(&self) -> TileRecordSnapshot {
        TileRecordSnapshot {
            key: self.key,
            owner: self.owner,
            grid: self.grid,
            origin: self.origin,
            writable: self.writable,
            byte_size: self.byte_size(),
            metric: self.metric,
            last_access: self.last_access,
            state: self.state,
            orphaned: self.is_orphaned(),
            backing_path: self.backing.path().to_path_buf(),
        }
    }
}

/// Point-in-time copy of a [`TileRecord`] handed out to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRecordSnapshot {
    pub key: TileKey,
    pub owner: OwnerId,
    pub grid: (i32, i32),
    pub origin: (i64, i64),
    pub writable: bool,
    pub byte_size: u64,
    pub metric: Option<i64>,
    pub last_access: Instant,
    pub state: TileState,
    pub orphaned: bool,
    pub backing_path: PathBuf,
}
