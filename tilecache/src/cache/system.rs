//! The tile cache.
//!
//! [`TileCache`] ties the pieces together: a registry of [`TileRecord`]s
//! (one per tile ever added and not yet removed), a [`ResidencyStore`] of
//! in-memory buffers, the backing files in the spill directory, the set of
//! checked-out tiles and the event bus.
//!
//! All of that state sits behind one mutex. Every public operation,
//! including its disk I/O, runs as a single critical section, so an eviction
//! scan can never race a checkout of the same tile. Nothing waits on another
//! thread: a held tile makes `checkout` return `None` instead of blocking,
//! and a release that finds a live write guard reports
//! [`ReleaseOutcome::WriterActive`] instead of waiting for it.
//!
//! Checkouts whose [`TileWriteHandle`] was dropped without a release are
//! persisted and released by the next operation that takes the lock.
//!
//! Lookup strategy for `get`:
//! 1. No record: `None` (a normal miss).
//! 2. Resident and live: return a view of the shared buffer.
//! 3. Resident but reclaimed, or not resident: reload from the backing
//!    file, evict least-recently-accessed tiles as needed, re-admit.

use crate::cache::buffer::TileBuffer;
use crate::cache::checkout::{CheckoutSet, CheckoutToken, ReleaseOutcome, TileWriteHandle};
use crate::cache::codec::TileCodec;
use crate::cache::events::{EventBus, TileEventReceiver};
use crate::cache::eviction::{
    plan_admission, plan_reclaim, plan_trim, AdmitMode, Admission, Candidate, EvictionPlan,
};
use crate::cache::key::TileKey;
use crate::cache::owner::TileOwner;
use crate::cache::record::{TileRecord, TileRecordSnapshot, TileState};
use crate::cache::residency::{Lookup, ResidencyStore};
use crate::cache::spill::SpillDirectory;
use crate::cache::stats::{CacheStatistics, CacheStats};
use crate::cache::types::{CacheError, SharedTile, TileView};
use crate::config::{format_size, ResidencyPolicy, TileCacheConfig};
use crate::log::{Logger, TracingLogger};
use crate::{log_debug, log_info, log_warn};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// State guarded by the cache-wide lock.
struct CacheState {
    records: HashMap<TileKey, TileRecord>,
    residency: ResidencyStore,
    checkouts: CheckoutSet,
    events: EventBus,
    stats: CacheStats,
    policy: ResidencyPolicy,
    use_threshold: bool,
    threshold: f32,
    clock: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Threshold usage for bulk trims, if threshold mode is on.
    fn soft_target(&self) -> Option<u64> {
        self.use_threshold
            .then(|| (self.residency.capacity() as f64 * self.threshold as f64) as u64)
    }

    fn candidates(&self, live_only: bool) -> Vec<Candidate> {
        self.residency
            .keys()
            .filter(|key| !live_only || self.residency.is_live(key))
            .filter_map(|key| {
                self.records.get(key).map(|record| Candidate {
                    key: *key,
                    access_stamp: record.access_stamp,
                    byte_size: record.byte_size(),
                    checked_out: self.checkouts.contains(key),
                })
            })
            .collect()
    }

    fn plan(&mut self, required: u64, mode: AdmitMode) -> Result<Admission, CacheError> {
        self.plan_replacing(required, mode, None)
    }

    /// Plan as if the entry of `replaced` were already gone.
    fn plan_replacing(
        &mut self,
        required: u64,
        mode: AdmitMode,
        replaced: Option<TileKey>,
    ) -> Result<Admission, CacheError> {
        let mut candidates = self.candidates(false);
        let mut usage = self.residency.usage();
        if let Some(key) = replaced {
            candidates.retain(|candidate| candidate.key != key);
            usage -= self.residency.byte_size_of(&key).unwrap_or(0);
        }
        let result = plan_admission(
            required,
            usage,
            self.residency.capacity(),
            self.soft_target(),
            candidates,
            mode,
        );
        if result.is_err() {
            self.stats.capacity_failures += 1;
        }
        result
    }

    /// Apply a successful plan and insert the tile. Returns residency.
    fn admit(
        &mut self,
        admission: Admission,
        key: TileKey,
        tile: SharedTile,
        byte_size: u64,
    ) -> bool {
        match admission {
            Admission::Fits => {}
            Admission::Evict(plan) => {
                self.evict(&plan);
            }
            Admission::Rejected => return false,
        }
        self.residency.insert(key, tile, byte_size);
        true
    }

    /// Evict down to capacity after it was lowered or a pinned tile released.
    fn trim_to_capacity(&mut self) -> EvictionPlan {
        let plan = plan_trim(
            self.residency.usage(),
            self.residency.capacity(),
            self.candidates(false),
        );
        self.evict(&plan);
        plan
    }

    /// Demote every victim to non-resident. Records and files are kept.
    fn evict(&mut self, plan: &EvictionPlan) -> usize {
        let mut evicted = 0;
        for key in &plan.victims {
            if self.residency.remove(key).is_none() {
                continue;
            }
            evicted += 1;
            if let Some(record) = self.records.get_mut(key) {
                record.state = TileState::NonResident;
                self.events.publish_record(record);
            }
        }
        self.stats.evictions += evicted as u64;
        evicted
    }
}

/// Tile cache with disk spillover, bounded residency and write checkout.
///
/// # Example
///
/// ```
/// use tilecache::cache::{ElementType, OwnerId, SampleLayout, TileBuffer, TileCache, TileOwner};
/// use tilecache::config::TileCacheConfig;
///
/// let dir = tempfile::TempDir::new().unwrap();
/// let cache = TileCache::new(TileCacheConfig::new().with_spill_dir(dir.path())).unwrap();
/// let owner = TileOwner::new(OwnerId::Numeric(1), SampleLayout::new(ElementType::U8, 1, 4), 2, 2);
///
/// cache.add(&owner, 0, 0, TileBuffer::from_samples(vec![1u8, 2, 3, 4]), None).unwrap();
/// let tile = cache.get(&owner, 0, 0).unwrap().unwrap();
/// assert_eq!(tile.read().bank::<u8>(0).unwrap(), &[1, 2, 3, 4]);
/// ```
pub struct TileCache {
    state: Mutex<CacheState>,
    spill: SpillDirectory,
    logger: Arc<dyn Logger>,
    event_queue_capacity: usize,
}

impl TileCache {
    /// Create a cache that logs through `tracing`.
    pub fn new(config: TileCacheConfig) -> Result<Self, CacheError> {
        Self::with_logger(config, Arc::new(TracingLogger::new()))
    }

    /// Create a cache that logs through `logger`.
    ///
    /// # Arguments
    /// * `config` - Validated before anything is created
    /// * `logger` - Receives lifecycle and warning messages
    ///
    /// Fails with [`CacheError::InvalidConfig`] for a bad configuration and
    /// [`CacheError::Io`] if the spill directory cannot be created.
    pub fn with_logger(
        config: TileCacheConfig,
        logger: Arc<dyn Logger>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let spill = SpillDirectory::open(&config.spill_dir)?;

        log_info!(
            logger,
            "Tile cache ready: capacity {}, residency {}, threshold {}, spill dir {}",
            format_size(config.initial_memory_capacity),
            config.new_tile_residency,
            if config.use_memory_threshold {
                format!("{:.2}", config.memory_threshold)
            } else {
                "off".to_string()
            },
            spill.root().display()
        );

        Ok(Self {
            state: Mutex::new(CacheState {
                records: HashMap::new(),
                residency: ResidencyStore::new(config.initial_memory_capacity),
                checkouts: CheckoutSet::new(),
                events: EventBus::new(),
                stats: CacheStats::new(),
                policy: config.new_tile_residency,
                use_threshold: config.use_memory_threshold,
                threshold: config.memory_threshold,
                clock: 0,
            }),
            spill,
            logger,
            event_queue_capacity: config.event_queue_capacity,
        })
    }

    // =========================================================================
    // Tile access
    // =========================================================================

    /// Add tile (`grid_x`, `grid_y`) of `owner` with its initial pixel data.
    ///
    /// Does nothing if the tile already has a record. Otherwise the buffer is
    /// written to a new backing file and then admitted according to the
    /// configured [`ResidencyPolicy`]. A failed disk write or a capacity
    /// failure under [`ResidencyPolicy::Always`] leaves no record behind.
    pub fn add(
        &self,
        owner: &TileOwner,
        grid_x: i32,
        grid_y: i32,
        buffer: TileBuffer,
        metric: Option<i64>,
    ) -> Result<(), CacheError> {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let policy = state.policy;
        self.add_locked(state, owner, grid_x, grid_y, buffer, metric, policy)
            .map(|_| ())
    }

    /// Read-only view of tile (`grid_x`, `grid_y`), reloading it from disk
    /// if needed.
    ///
    /// `Ok(None)` means the tile is unknown or its backing file could not be
    /// read. Only a capacity failure while re-admitting is an error. Writing
    /// requires [`TileCache::checkout`].
    pub fn get(
        &self,
        owner: &TileOwner,
        grid_x: i32,
        grid_y: i32,
    ) -> Result<Option<TileView>, CacheError> {
        let key = owner.key(grid_x, grid_y);
        let mut guard = self.lock_state();
        Ok(self.resolve_locked(&mut guard, key)?.map(TileView::new))
    }

    /// [`TileCache::get`] for several tiles under one lock.
    pub fn get_batch(
        &self,
        owner: &TileOwner,
        positions: &[(i32, i32)],
    ) -> Result<Vec<Option<TileView>>, CacheError> {
        let mut guard = self.lock_state();
        positions
            .iter()
            .map(|&(x, y)| {
                self.resolve_locked(&mut guard, owner.key(x, y))
                    .map(|tile| tile.map(TileView::new))
            })
            .collect()
    }

    /// Views of every live resident tile of `owner`, by grid position.
    pub fn resident_tiles(&self, owner: &TileOwner) -> Vec<((i32, i32), TileView)> {
        let state = self.lock_state();
        let owner_id = owner.id();
        let mut tiles: Vec<_> = state
            .residency
            .keys()
            .filter(|key| key.belongs_to(&owner_id))
            .filter_map(|key| match state.residency.lookup(key) {
                Lookup::Live(tile) => Some((key.grid(), TileView::new(tile))),
                _ => None,
            })
            .collect();
        tiles.sort_by_key(|(grid, _)| *grid);
        tiles
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Remove one tile and delete its backing file.
    pub fn remove(&self, owner: &TileOwner, grid_x: i32, grid_y: i32) -> bool {
        let mut guard = self.lock_state();
        self.discard_locked(&mut guard, owner.key(grid_x, grid_y))
    }

    /// Remove every tile of `owner`. Returns the number removed.
    pub fn remove_tiles(&self, owner: &TileOwner) -> usize {
        let owner_id = owner.id();
        let mut guard = self.lock_state();
        let mut keys: Vec<TileKey> = guard
            .records
            .keys()
            .filter(|key| key.belongs_to(&owner_id))
            .copied()
            .collect();
        keys.sort();

        let removed = keys
            .into_iter()
            .filter(|key| self.discard_locked(&mut guard, *key))
            .count();
        log_debug!(self.logger, "Removed {} tiles of {}", removed, owner_id);
        removed
    }

    /// Remove every record whose owner is gone. Returns the number removed.
    ///
    /// Orphans are only swept here or by [`TileCache::flush`].
    pub fn sweep_orphans(&self) -> usize {
        let mut guard = self.lock_state();
        let mut keys: Vec<TileKey> = guard
            .records
            .values()
            .filter(|record| record.is_orphaned())
            .map(TileRecord::key)
            .collect();
        keys.sort();

        let removed = keys
            .into_iter()
            .filter(|key| self.discard_locked(&mut guard, *key))
            .count();
        if removed > 0 {
            log_info!(self.logger, "Swept {} orphaned tiles", removed);
        }
        removed
    }

    /// Drop every record, resident buffer, checkout and backing file.
    pub fn flush(&self) {
        let mut guard = self.lock_state();
        let mut keys: Vec<TileKey> = guard.records.keys().copied().collect();
        keys.sort();

        let count = keys.len();
        for key in keys {
            self.discard_locked(&mut guard, key);
        }
        if !guard.residency.is_empty() || !guard.checkouts.is_empty() {
            log_warn!(self.logger, "Flush found residency entries without records");
            guard.residency.clear();
            guard.checkouts.clear();
        }
        log_info!(self.logger, "Tile cache flushed: {} tiles removed", count);
    }

    // =========================================================================
    // Capacity
    // =========================================================================

    /// Change the memory budget. Shrinking evicts until usage fits.
    pub fn set_memory_capacity(&self, bytes: u64) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.residency.set_capacity(bytes);

        if state.residency.usage() > bytes {
            let plan = state.trim_to_capacity();
            log_debug!(
                self.logger,
                "Capacity lowered to {}: evicted {} tiles",
                format_size(bytes),
                plan.victims.len()
            );
        }
        if state.residency.usage() > bytes {
            log_warn!(
                self.logger,
                "Resident usage {} still exceeds capacity {}: remaining tiles are checked out",
                format_size(state.residency.usage()),
                format_size(bytes)
            );
        }
    }

    /// Memory budget for resident buffers, in bytes.
    pub fn get_memory_capacity(&self) -> u64 {
        self.lock_state().residency.capacity()
    }

    /// Set the trim threshold as a fraction of capacity in `[0, 1]`.
    ///
    /// Runs [`TileCache::memory_control`] right away when threshold mode is on.
    pub fn set_memory_threshold(&self, fraction: f32) -> Result<(), CacheError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(CacheError::InvalidConfig(format!(
                "memory threshold must be within [0, 1], got {}",
                fraction
            )));
        }
        let enabled = {
            let mut state = self.lock_state();
            state.threshold = fraction;
            state.use_threshold
        };
        if enabled {
            self.memory_control();
        }
        Ok(())
    }

    /// Trim threshold as a fraction of capacity.
    pub fn get_memory_threshold(&self) -> f32 {
        self.lock_state().threshold
    }

    /// Turn threshold mode on or off.
    ///
    /// With threshold mode on, forced admissions and [`TileCache::memory_control`]
    /// evict down to `threshold x capacity` rather than just to capacity.
    /// Changing the mode evicts nothing by itself.
    pub fn set_use_memory_threshold(&self, enabled: bool) {
        self.lock_state().use_threshold = enabled;
    }

    /// Whether threshold mode is on.
    pub fn is_using_memory_threshold(&self) -> bool {
        self.lock_state().use_threshold
    }

    /// Trim residency to `threshold x capacity` (or to capacity when threshold
    /// mode is off). Checked-out tiles are never evicted. Returns the number
    /// of tiles evicted.
    pub fn memory_control(&self) -> usize {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let target = state
            .soft_target()
            .unwrap_or_else(|| state.residency.capacity());
        let plan = plan_trim(state.residency.usage(), target, state.candidates(false));
        let evicted = state.evict(&plan);
        if evicted > 0 {
            log_debug!(
                self.logger,
                "Memory control evicted {} tiles ({}), usage now {}",
                evicted,
                format_size(plan.freed),
                format_size(state.residency.usage())
            );
        }
        evicted
    }

    /// Drop up to `bytes` of least-recently-accessed resident buffers, as a
    /// memory manager would under pressure. Capacity accounting is left
    /// alone; the next `get` of such a tile reloads it from disk. Returns the
    /// number of bytes dropped.
    pub fn relieve_memory_pressure(&self, bytes: u64) -> u64 {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let plan = plan_reclaim(bytes, state.candidates(true));
        for key in &plan.victims {
            if !state.residency.reclaim(key) {
                continue;
            }
            state.stats.reclaimed += 1;
            if let Some(record) = state.records.get_mut(key) {
                record.state = TileState::GarbageReclaimed;
                state.events.publish_record(record);
            }
        }
        plan.freed
    }

    // =========================================================================
    // Write checkout
    // =========================================================================

    /// Take exclusive write access to an existing tile.
    ///
    /// Returns `Ok(None)` right away if the tile is already checked out, is
    /// unknown, or cannot be reloaded.
    pub fn checkout(
        &self,
        owner: &TileOwner,
        grid_x: i32,
        grid_y: i32,
    ) -> Result<Option<TileWriteHandle>, CacheError> {
        self.checkout_inner(owner, grid_x, grid_y, None::<fn() -> TileBuffer>)
    }

    /// Like [`TileCache::checkout`], but adds the tile with the buffer built
    /// by `init` if it is new. A new tile is always made resident.
    ///
    /// `init` runs under the cache lock and must not call back into the cache.
    pub fn checkout_with(
        &self,
        owner: &TileOwner,
        grid_x: i32,
        grid_y: i32,
        init: impl FnOnce() -> TileBuffer,
    ) -> Result<Option<TileWriteHandle>, CacheError> {
        self.checkout_inner(owner, grid_x, grid_y, Some(init))
    }

    /// End the checkout of tile (`grid_x`, `grid_y`) and persist its buffer.
    ///
    /// Whoever holds the checkout, its handle stops accepting writes once
    /// this returns [`ReleaseOutcome::Released`].
    ///
    /// # Returns
    /// * `Released` - Buffer persisted, tile evictable again
    /// * `NotCheckedOut` - Nothing to release; logged as a warning
    /// * `WriterActive` - A write guard is alive; nothing changed, retry later
    ///
    /// A failed write to the backing file is returned as an error and the
    /// checkout stays in place.
    pub fn release(
        &self,
        owner: &TileOwner,
        grid_x: i32,
        grid_y: i32,
    ) -> Result<ReleaseOutcome, CacheError> {
        let key = owner.key(grid_x, grid_y);
        let mut guard = self.lock_state();
        self.release_locked(&mut guard, key, None)
    }

    /// Release through the handle returned by checkout.
    ///
    /// A handle whose checkout was already released, by coordinates or by
    /// removal of the tile, gets [`ReleaseOutcome::NotCheckedOut`] and cannot
    /// end a later checkout of the same tile.
    pub fn release_handle(&self, handle: TileWriteHandle) -> Result<ReleaseOutcome, CacheError> {
        let mut guard = self.lock_state();
        self.release_locked(&mut guard, handle.key(), Some(handle.token()))
    }

    /// Whether `key` is checked out by a live handle.
    pub fn is_checked_out(&self, key: &TileKey) -> bool {
        self.lock_state().checkouts.contains(key)
    }

    /// Every checked-out key, in key order.
    pub fn checked_out_keys(&self) -> Vec<TileKey> {
        self.lock_state().checkouts.keys()
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Subscribe to lifecycle events with the configured queue length.
    pub fn subscribe(&self) -> TileEventReceiver {
        self.subscribe_with_capacity(self.event_queue_capacity)
    }

    /// Subscribe to lifecycle events.
    ///
    /// # Arguments
    /// * `capacity` - Events queued for this subscriber before new ones are
    ///   dropped and counted in [`CacheStatistics::dropped_events`]
    pub fn subscribe_with_capacity(&self, capacity: usize) -> TileEventReceiver {
        let mut state = self.lock_state();
        let receiver = state.events.subscribe(capacity);
        log_debug!(
            self.logger,
            "Event subscriber added ({} active)",
            state.events.subscriber_count()
        );
        receiver
    }

    /// True if tile (`grid_x`, `grid_y`) of `owner` has a record, resident
    /// or not.
    pub fn contains(&self, owner: &TileOwner, grid_x: i32, grid_y: i32) -> bool {
        self.lock_state()
            .records
            .contains_key(&owner.key(grid_x, grid_y))
    }

    /// True if the tile holds a live in-memory buffer.
    pub fn is_resident(&self, key: &TileKey) -> bool {
        self.lock_state().residency.is_live(key)
    }

    /// Copy of the bookkeeping for `key`.
    ///
    /// # Example
    ///
    /// ```
    /// use tilecache::cache::{ElementType, OwnerId, SampleLayout, TileBuffer, TileCache, TileOwner, TileState};
    /// use tilecache::config::TileCacheConfig;
    ///
    /// let dir = tempfile::TempDir::new().unwrap();
    /// let cache = TileCache::new(TileCacheConfig::new().with_spill_dir(dir.path())).unwrap();
    /// let owner = TileOwner::new(OwnerId::Numeric(1), SampleLayout::new(ElementType::U8, 1, 4), 2, 2);
    /// cache.add(&owner, 1, 0, TileBuffer::from_samples(vec![0u8; 4]), Some(7)).unwrap();
    ///
    /// let record = cache.record(&owner.key(1, 0)).unwrap();
    /// assert_eq!(record.state, TileState::AddedResident);
    /// assert_eq!(record.metric, Some(7));
    /// ```
    pub fn record(&self, key: &TileKey) -> Option<TileRecordSnapshot> {
        self.lock_state().records.get(key).map(TileRecord::snapshot)
    }

    /// Number of tile records, resident or not.
    pub fn tile_count(&self) -> usize {
        self.lock_state().records.len()
    }

    /// Number of residency entries, including reclaimed ones not yet noticed.
    pub fn resident_count(&self) -> usize {
        self.lock_state().residency.len()
    }

    /// Resident bytes according to the cache's own bookkeeping.
    pub fn memory_usage(&self) -> u64 {
        self.lock_state().residency.usage()
    }

    /// Policy applied to tiles passed to [`TileCache::add`].
    pub fn residency_policy(&self) -> ResidencyPolicy {
        self.lock_state().policy
    }

    /// Directory holding the backing files.
    pub fn spill_dir(&self) -> &Path {
        self.spill.root()
    }

    /// Counters plus current occupancy. See [`CacheStatistics::format`].
    pub fn stats(&self) -> CacheStatistics {
        let state = self.lock_state();
        CacheStatistics {
            stats: state.stats.clone(),
            tile_count: state.records.len(),
            resident_count: state.residency.len(),
            checked_out_count: state.checkouts.len(),
            memory_usage: state.residency.usage(),
            memory_capacity: state.residency.capacity(),
            dropped_events: state.events.dropped(),
            hit_rate_percent: state.stats.hit_rate() * 100.0,
        }
    }

    // =========================================================================
    // Locked helpers
    // =========================================================================

    /// Returns the new tile's buffer, or `None` if the tile already existed.
    #[allow(clippy::too_many_arguments)]
    fn add_locked(
        &self,
        state: &mut CacheState,
        owner: &TileOwner,
        grid_x: i32,
        grid_y: i32,
        buffer: TileBuffer,
        metric: Option<i64>,
        policy: ResidencyPolicy,
    ) -> Result<Option<SharedTile>, CacheError> {
        let key = owner.key(grid_x, grid_y);
        if state.records.contains_key(&key) {
            log_debug!(self.logger, "Tile {} already cached, add ignored", key);
            return Ok(None);
        }
        if buffer.layout() != owner.layout() {
            return Err(CacheError::LayoutMismatch {
                expected: owner.layout(),
                actual: buffer.layout(),
            });
        }

        let byte_size = buffer.byte_size();
        let admission = match policy {
            ResidencyPolicy::Always => Some(state.plan(byte_size, AdmitMode::Force)?),
            ResidencyPolicy::Try => Some(state.plan(byte_size, AdmitMode::NoSwap)?),
            ResidencyPolicy::Never => None,
        };

        let backing = self.spill.create().inspect_err(|_| {
            state.stats.disk_write_failures += 1;
        })?;
        let stamp = state.tick();
        let mut record = TileRecord::new(owner, grid_x, grid_y, backing, metric, stamp);

        if let Err(e) = TileCodec::write(&record, &buffer) {
            state.stats.disk_write_failures += 1;
            log_warn!(self.logger, "Failed to persist tile {}: {}", key, e);
            if let Err(cleanup) = record.into_backing().delete() {
                log_warn!(self.logger, "Failed to delete partial backing file: {}", cleanup);
            }
            return Err(e);
        }
        state.stats.disk_writes += 1;

        let tile: SharedTile = Arc::new(RwLock::new(buffer));
        let resident = match admission {
            Some(admission) => state.admit(admission, key, Arc::clone(&tile), byte_size),
            None => false,
        };
        record.state = if resident {
            TileState::AddedResident
        } else {
            TileState::Added
        };
        state.events.publish_record(&record);
        state.records.insert(key, record);

        if resident {
            log_debug!(self.logger, "Added tile {} ({}, resident)", key, format_size(byte_size));
        } else {
            log_debug!(
                self.logger,
                "Added tile {} ({}, on disk; {} free)",
                key,
                format_size(byte_size),
                format_size(state.residency.free())
            );
        }
        Ok(Some(tile))
    }

    fn resolve_locked(
        &self,
        state: &mut CacheState,
        key: TileKey,
    ) -> Result<Option<SharedTile>, CacheError> {
        if !state.records.contains_key(&key) {
            state.stats.misses += 1;
            return Ok(None);
        }

        let vanished = match state.residency.lookup(&key) {
            Lookup::Live(tile) => {
                let stamp = state.tick();
                if let Some(record) = state.records.get_mut(&key) {
                    record.touch(stamp, TileState::Accessed);
                    state.events.publish_record(record);
                }
                state.stats.hits += 1;
                return Ok(Some(tile));
            }
            Lookup::Vanished => true,
            Lookup::Absent => false,
        };

        let byte_size = match state.records.get(&key) {
            Some(record) => record.byte_size(),
            None => return Ok(None),
        };
        // The reclaimed entry is replaced by the reload; nothing changes if
        // there is no room for it.
        let admission =
            state.plan_replacing(byte_size, AdmitMode::Force, vanished.then_some(key))?;
        if vanished {
            state.residency.remove(&key);
            log_debug!(self.logger, "Buffer of tile {} was reclaimed, reloading", key);
        }

        let loaded = match state.records.get(&key) {
            Some(record) => TileCodec::read(record),
            None => return Ok(None),
        };
        let buffer = match loaded {
            Ok(buffer) => buffer,
            Err(e) => {
                state.stats.reload_failures += 1;
                log_warn!(self.logger, "Failed to reload tile {}: {}", key, e);
                return Ok(None);
            }
        };
        state.stats.reloads += 1;

        let tile: SharedTile = Arc::new(RwLock::new(buffer));
        state.admit(admission, key, Arc::clone(&tile), byte_size);
        let stamp = state.tick();
        if let Some(record) = state.records.get_mut(&key) {
            record.touch(stamp, TileState::Resident);
            state.events.publish_record(record);
        }
        Ok(Some(tile))
    }

    fn discard_locked(&self, state: &mut CacheState, key: TileKey) -> bool {
        let Some(record) = state.records.remove(&key) else {
            return false;
        };
        state.residency.remove(&key);
        if state.checkouts.release(&key) {
            log_debug!(self.logger, "Tile {} removed while checked out", key);
        }
        state.events.publish(
            key,
            record.owner(),
            record.grid(),
            TileState::Removed,
            record.byte_size(),
        );
        if let Err(e) = record.into_backing().delete() {
            log_warn!(self.logger, "Failed to delete backing file of {}: {}", key, e);
        }
        true
    }

    fn checkout_inner<F: FnOnce() -> TileBuffer>(
        &self,
        owner: &TileOwner,
        grid_x: i32,
        grid_y: i32,
        init: Option<F>,
    ) -> Result<Option<TileWriteHandle>, CacheError> {
        let key = owner.key(grid_x, grid_y);
        let mut guard = self.lock_state();
        let state = &mut *guard;

        if state.checkouts.contains(&key) {
            state.stats.rejected_checkouts += 1;
            log_debug!(self.logger, "Tile {} is already checked out", key);
            return Ok(None);
        }

        let tile = match (state.records.contains_key(&key), init) {
            (false, Some(init)) => {
                match self.add_locked(
                    state,
                    owner,
                    grid_x,
                    grid_y,
                    init(),
                    None,
                    ResidencyPolicy::Always,
                )? {
                    Some(tile) => tile,
                    None => return Ok(None),
                }
            }
            _ => match self.resolve_locked(state, key)? {
                Some(tile) => tile,
                None => return Ok(None),
            },
        };

        let Some(token) = state.checkouts.try_acquire(key) else {
            return Ok(None);
        };
        state.stats.checkouts += 1;
        if let Some(record) = state.records.get_mut(&key) {
            record.writable = true;
        }
        Ok(Some(TileWriteHandle::new(
            key,
            owner.id(),
            (grid_x, grid_y),
            tile,
            token,
        )))
    }

    /// Lock the state, first releasing checkouts whose handle was dropped.
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        let mut guard = self.state.lock();
        if !guard.checkouts.is_empty() {
            self.reap_abandoned(&mut guard);
        }
        guard
    }

    fn reap_abandoned(&self, state: &mut CacheState) {
        for key in state.checkouts.abandoned() {
            state.stats.abandoned_releases += 1;
            match self.release_locked(state, key, None) {
                Ok(ReleaseOutcome::Released) => {
                    log_debug!(self.logger, "Released tile {} after its handle was dropped", key);
                }
                Ok(_) => {}
                Err(e) => {
                    log_warn!(
                        self.logger,
                        "Dropped checkout of tile {} without persisting it: {}",
                        key,
                        e
                    );
                    state.checkouts.release(&key);
                }
            }
        }
    }

    /// Persist and release `key`. With a `token`, only that checkout may be
    /// released.
    fn release_locked(
        &self,
        state: &mut CacheState,
        key: TileKey,
        token: Option<&Arc<CheckoutToken>>,
    ) -> Result<ReleaseOutcome, CacheError> {
        let held = match (state.checkouts.token(&key), token) {
            (Some(current), Some(token)) => Arc::ptr_eq(current, token),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !held {
            state.stats.invalid_releases += 1;
            log_warn!(
                self.logger,
                "Release of tile {} ignored: tile is not checked out",
                key
            );
            return Ok(ReleaseOutcome::NotCheckedOut);
        }

        let tile = match state.residency.lookup(&key) {
            Lookup::Live(tile) => tile,
            _ => {
                state.checkouts.release(&key);
                state.stats.releases += 1;
                log_warn!(self.logger, "Released tile {} is no longer resident", key);
                return Ok(ReleaseOutcome::Released);
            }
        };
        let Some(record) = state.records.get(&key) else {
            state.checkouts.release(&key);
            state.stats.releases += 1;
            return Ok(ReleaseOutcome::Released);
        };

        // Never wait for a writer while holding the cache lock.
        let Some(buffer) = tile.try_read() else {
            state.stats.busy_releases += 1;
            log_debug!(
                self.logger,
                "Release of tile {} deferred: a write guard is alive",
                key
            );
            return Ok(ReleaseOutcome::WriterActive);
        };
        if let Err(e) = TileCodec::write(record, &buffer) {
            state.stats.disk_write_failures += 1;
            log_warn!(self.logger, "Failed to persist released tile {}: {}", key, e);
            return Err(e);
        }
        // Cleared while the read lock still excludes writers.
        state.checkouts.release(&key);
        drop(buffer);
        state.stats.disk_writes += 1;
        state.stats.releases += 1;

        let stamp = state.tick();
        if let Some(record) = state.records.get_mut(&key) {
            record.touch(stamp, TileState::Accessed);
            state.events.publish_record(record);
        }

        // A capacity lowered below the pinned tiles is enforced once they are released.
        if state.residency.usage() > state.residency.capacity() {
            state.trim_to_capacity();
        }
        Ok(ReleaseOutcome::Released)
    }
}

impl Drop for TileCache {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.records.is_empty() {
            log_debug!(
                self.logger,
                "Dropping tile cache with {} tiles; deleting backing files",
                state.records.len()
            );
        }
    }
}
