//! Integration tests for the tile cache.
//!
//! These tests drive the public API end to end:
//! - Bounded residency with swapping to and from disk
//! - Flush and backing file cleanup
//! - Checkout pinning tiles against eviction
//! - Capacity failures leaving the cache untouched
//! - Lifecycle events and multi-threaded checkout

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;
use tilecache::cache::{
    CacheError, ElementType, OwnerId, OwnerLease, ReleaseOutcome, SampleLayout, TileBuffer,
    TileCache, TileCodec, TileOwner, TileState,
};
use tilecache::config::{ResidencyPolicy, TileCacheConfig};
use tilecache::log::{CaptureLogger, LogLevel, NoOpLogger};

// =============================================================================
// Test Helpers
// =============================================================================

const TILE_W: u32 = 16;
const TILE_H: u32 = 16;
const BANKS: usize = 3;
const TILE_BYTES: u64 = (TILE_W * TILE_H) as u64 * BANKS as u64 * 2;

fn layout() -> SampleLayout {
    SampleLayout::new(ElementType::I16, BANKS, (TILE_W * TILE_H) as usize)
}

fn raster(id: u64) -> TileOwner {
    TileOwner::new(OwnerId::Numeric(id), layout(), TILE_W, TILE_H)
}

/// A tile whose every sample encodes its grid position.
fn tile_at(x: i32, y: i32) -> TileBuffer {
    let value = (x * 100 + y) as i16;
    let bank = vec![value; (TILE_W * TILE_H) as usize];
    TileBuffer::from_banks(vec![bank.clone(), bank.clone(), bank]).unwrap()
}

fn cache(dir: &TempDir, tiles: u64, policy: ResidencyPolicy) -> TileCache {
    let config = TileCacheConfig::new()
        .with_spill_dir(dir.path())
        .with_memory_capacity(tiles * TILE_BYTES)
        .with_residency(policy);
    TileCache::with_logger(config, Arc::new(NoOpLogger)).unwrap()
}

fn resident_grids(cache: &TileCache, owner: &TileOwner) -> Vec<(i32, i32)> {
    cache
        .resident_tiles(owner)
        .into_iter()
        .map(|(grid, _)| grid)
        .collect()
}

fn files_in(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

// =============================================================================
// Residency
// =============================================================================

#[test]
fn test_capacity_bounded_swap() {
    let dir = TempDir::new().unwrap();
    let cache = cache(&dir, 3, ResidencyPolicy::Try);
    let owner = raster(1);

    for x in 0..6 {
        cache.add(&owner, x, 0, tile_at(x, 0), None).unwrap();
    }

    assert_eq!(cache.tile_count(), 6);
    assert_eq!(resident_grids(&cache, &owner), vec![(0, 0), (1, 0), (2, 0)]);
    assert!(cache.memory_usage() <= cache.get_memory_capacity());

    let tile = cache.get(&owner, 4, 0).unwrap().unwrap();
    assert_eq!(tile.read().bank::<i16>(2).unwrap()[0], 400);

    assert_eq!(resident_grids(&cache, &owner), vec![(1, 0), (2, 0), (4, 0)]);
    assert_eq!(
        cache.record(&owner.key(0, 0)).unwrap().state,
        TileState::NonResident
    );
    assert_eq!(cache.tile_count(), 6);
    assert_eq!(cache.memory_usage(), 3 * TILE_BYTES);
}

#[test]
fn test_evicted_tile_keeps_its_data() {
    let dir = TempDir::new().unwrap();
    let cache = cache(&dir, 1, ResidencyPolicy::Always);
    let owner = raster(1);

    for x in 0..4 {
        cache.add(&owner, x, 2, tile_at(x, 2), None).unwrap();
    }

    for x in 0..4 {
        let tile = cache.get(&owner, x, 2).unwrap().unwrap();
        assert_eq!(tile.read().bank::<i16>(0).unwrap()[7], (x * 100 + 2) as i16);
        assert_eq!(cache.resident_count(), 1);
    }
}

#[test]
fn test_flush_deletes_everything() {
    let dir = TempDir::new().unwrap();
    let cache = cache(&dir, 2, ResidencyPolicy::Try);
    let owner = raster(1);
    for x in 0..5 {
        cache.add(&owner, x, x, tile_at(x, x), None).unwrap();
    }
    let paths: Vec<_> = (0..5)
        .map(|x| cache.record(&owner.key(x, x)).unwrap().backing_path)
        .collect();
    assert_eq!(files_in(&dir), 5);

    cache.flush();

    assert_eq!(cache.tile_count(), 0);
    assert_eq!(cache.resident_count(), 0);
    assert_eq!(cache.memory_usage(), 0);
    assert!(paths.iter().all(|path| !path.exists()));
    assert_eq!(files_in(&dir), 0);
}

// =============================================================================
// Checkout
// =============================================================================

#[test]
fn test_checkout_blocks_eviction() {
    let dir = TempDir::new().unwrap();
    let cache = cache(&dir, 3, ResidencyPolicy::Always);
    let owner = raster(1);
    for x in 0..3 {
        cache.add(&owner, x, 0, tile_at(x, 0), None).unwrap();
    }

    let handle = cache.checkout(&owner, 0, 0).unwrap().unwrap();
    // The checkout refreshed tile 0, so make it the oldest again.
    cache.get(&owner, 1, 0).unwrap();
    cache.get(&owner, 2, 0).unwrap();

    cache.add(&owner, 3, 0, tile_at(3, 0), None).unwrap();

    assert!(cache.is_resident(&handle.key()));
    assert!(!cache.is_resident(&owner.key(1, 0)));
    assert_eq!(resident_grids(&cache, &owner), vec![(0, 0), (2, 0), (3, 0)]);
    assert!(cache.release_handle(handle).unwrap().is_released());
}

#[test]
fn test_capacity_too_small_leaves_state_unchanged() {
    let dir = TempDir::new().unwrap();
    let cache = cache(&dir, 3, ResidencyPolicy::Always);
    let owner = raster(1);
    for x in 0..3 {
        cache.add(&owner, x, 0, tile_at(x, 0), None).unwrap();
    }
    let handles: Vec<_> = (0..3)
        .map(|x| cache.checkout(&owner, x, 0).unwrap().unwrap())
        .collect();
    let usage = cache.memory_usage();
    let files = files_in(&dir);

    let err = cache.add(&owner, 3, 0, tile_at(3, 0), None).unwrap_err();

    match err {
        CacheError::CapacityExceeded {
            required,
            evictable,
            ..
        } => {
            assert_eq!(required, TILE_BYTES);
            assert_eq!(evictable, 0);
        }
        other => panic!("expected CapacityExceeded, got {other}"),
    }
    assert!(!cache.contains(&owner, 3, 0));
    assert_eq!(cache.tile_count(), 3);
    assert_eq!(cache.memory_usage(), usage);
    assert_eq!(files_in(&dir), files);
    assert_eq!(resident_grids(&cache, &owner), vec![(0, 0), (1, 0), (2, 0)]);
    assert_eq!(cache.checked_out_keys().len(), 3);
    assert_eq!(cache.stats().stats.capacity_failures, 1);

    for handle in handles {
        assert!(cache.release_handle(handle).unwrap().is_released());
    }
}

#[test]
fn test_released_writes_survive_eviction() {
    let dir = TempDir::new().unwrap();
    let cache = cache(&dir, 1, ResidencyPolicy::Always);
    let owner = raster(1);
    cache.add(&owner, 0, 0, tile_at(0, 0), None).unwrap();

    let handle = cache.checkout(&owner, 0, 0).unwrap().unwrap();
    handle.write().unwrap().bank_mut::<i16>(1).unwrap().fill(-7);
    assert!(cache.release(&owner, 0, 0).unwrap().is_released());
    assert!(handle.write().is_err());
    drop(handle);

    // Evict tile 0, then bring it back from disk.
    cache.add(&owner, 1, 0, tile_at(1, 0), None).unwrap();
    assert!(!cache.is_resident(&owner.key(0, 0)));

    let tile = cache.get(&owner, 0, 0).unwrap().unwrap();
    let tile = tile.read();
    assert!(tile.bank::<i16>(1).unwrap().iter().all(|&v| v == -7));
    assert!(tile.bank::<i16>(0).unwrap().iter().all(|&v| v == 0));
}

#[test]
fn test_release_without_checkout_is_logged() {
    let dir = TempDir::new().unwrap();
    let logger = Arc::new(CaptureLogger::new());
    let config = TileCacheConfig::new().with_spill_dir(dir.path());
    let cache = TileCache::with_logger(config, logger.clone()).unwrap();
    let owner = raster(1);

    assert_eq!(
        cache.release(&owner, 9, 9).unwrap(),
        ReleaseOutcome::NotCheckedOut
    );
    assert!(logger.contains(LogLevel::Warn, "not checked out"));
}

#[test]
fn test_concurrent_checkout_is_exclusive() {
    const THREADS: usize = 8;
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(cache(&dir, 4, ResidencyPolicy::Try));
    let owner = Arc::new(raster(1));
    cache.add(&owner, 0, 0, tile_at(0, 0), None).unwrap();

    let barrier = Arc::new(Barrier::new(THREADS));
    let granted = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let owner = Arc::clone(&owner);
            let barrier = Arc::clone(&barrier);
            let granted = Arc::clone(&granted);
            thread::spawn(move || {
                barrier.wait();
                let handle = cache.checkout(&owner, 0, 0).unwrap()?;
                granted.fetch_add(1, Ordering::SeqCst);
                handle.write().unwrap().bank_mut::<i16>(0).unwrap()[0] += 1;
                // The checkout outlives the thread until released.
                Some(handle)
            })
        })
        .collect();

    let handles: Vec<_> = workers
        .into_iter()
        .filter_map(|worker| worker.join().unwrap())
        .collect();

    assert_eq!(granted.load(Ordering::SeqCst), 1);
    assert_eq!(handles.len(), 1);
    assert_eq!(cache.stats().stats.rejected_checkouts, (THREADS - 1) as u64);
    for handle in handles {
        assert!(cache.release_handle(handle).unwrap().is_released());
    }
    let tile = cache.get(&owner, 0, 0).unwrap().unwrap();
    assert_eq!(tile.read().bank::<i16>(0).unwrap()[0], 1);
}

#[test]
fn test_parallel_writers_on_distinct_tiles() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(cache(&dir, 2, ResidencyPolicy::Try));
    let owner = Arc::new(raster(3));

    let workers: Vec<_> = (0..6)
        .map(|x| {
            let cache = Arc::clone(&cache);
            let owner = Arc::clone(&owner);
            thread::spawn(move || {
                // Every resident tile may be held by another writer; retry.
                let handle = loop {
                    match cache.checkout_with(&owner, x, 0, || TileBuffer::zeroed(layout())) {
                        Ok(Some(handle)) => break handle,
                        Err(e) if e.is_capacity_exceeded() => thread::yield_now(),
                        other => panic!("unexpected checkout result: {other:?}"),
                    }
                };
                handle.write().unwrap().bank_mut::<i16>(0).unwrap().fill(x as i16 + 1);
                cache.release_handle(handle).unwrap()
            })
        })
        .collect();
    for worker in workers {
        assert!(worker.join().unwrap().is_released());
    }

    assert_eq!(cache.tile_count(), 6);
    assert!(cache.memory_usage() <= cache.get_memory_capacity());
    for x in 0..6 {
        let path = cache.record(&owner.key(x, 0)).unwrap().backing_path;
        let on_disk = TileCodec::read_path(&path, &layout()).unwrap();
        assert!(on_disk
            .bank::<i16>(0)
            .unwrap()
            .iter()
            .all(|&v| v == x as i16 + 1));
    }
}

// =============================================================================
// Owners and events
// =============================================================================

#[test]
fn test_owners_are_isolated() {
    let dir = TempDir::new().unwrap();
    let cache = cache(&dir, 8, ResidencyPolicy::Try);
    let a = raster(1);
    let b = TileOwner::new(OwnerId::from_identity_bytes(b"scene-b"), layout(), TILE_W, TILE_H);

    cache.add(&a, 0, 0, tile_at(1, 0), None).unwrap();
    cache.add(&b, 0, 0, tile_at(2, 0), None).unwrap();

    let from_a = cache.get(&a, 0, 0).unwrap().unwrap();
    let from_b = cache.get(&b, 0, 0).unwrap().unwrap();
    assert_eq!(from_a.read().bank::<i16>(0).unwrap()[0], 100);
    assert_eq!(from_b.read().bank::<i16>(0).unwrap()[0], 200);

    assert_eq!(cache.remove_tiles(&b), 1);
    assert!(cache.contains(&a, 0, 0));
    assert!(!cache.contains(&b, 0, 0));
}

#[test]
fn test_orphans_swept_after_owner_dies() {
    let dir = TempDir::new().unwrap();
    let cache = cache(&dir, 8, ResidencyPolicy::Try);
    let lease = OwnerLease::new();
    let owner = raster(5).with_liveness(lease.liveness());
    for x in 0..3 {
        cache.add(&owner, x, 0, tile_at(x, 0), None).unwrap();
    }

    drop(lease);

    // Orphaned tiles stay until swept.
    assert_eq!(cache.tile_count(), 3);
    assert_eq!(cache.sweep_orphans(), 3);
    assert_eq!(cache.tile_count(), 0);
    assert_eq!(files_in(&dir), 0);
}

#[test]
fn test_event_stream_reports_lifecycle() {
    let dir = TempDir::new().unwrap();
    let cache = cache(&dir, 1, ResidencyPolicy::Try);
    let owner = raster(1);
    let mut events = cache.subscribe();

    cache.add(&owner, 0, 0, tile_at(0, 0), None).unwrap();
    cache.add(&owner, 1, 0, tile_at(1, 0), None).unwrap();
    cache.get(&owner, 1, 0).unwrap();
    cache.relieve_memory_pressure(TILE_BYTES);
    cache.get(&owner, 1, 0).unwrap();
    cache.flush();

    let events = events.drain();
    let seen: Vec<_> = events.iter().map(|e| (e.grid, e.state)).collect();
    assert_eq!(
        seen,
        vec![
            ((0, 0), TileState::AddedResident),
            ((1, 0), TileState::Added),
            ((0, 0), TileState::NonResident),
            ((1, 0), TileState::Resident),
            ((1, 0), TileState::GarbageReclaimed),
            ((1, 0), TileState::Resident),
            ((0, 0), TileState::Removed),
            ((1, 0), TileState::Removed),
        ]
    );
    let sequences: HashSet<_> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences.len(), events.len());
    assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(events.iter().all(|e| e.byte_size == TILE_BYTES));
}
