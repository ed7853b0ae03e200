//! Exclusive write checkout of tiles.
//!
//! Each hold is backed by a [`CheckoutToken`] shared with the one
//! [`TileWriteHandle`] it was granted to. Releasing the hold deactivates the
//! token, after which the handle refuses to write. A token whose handle was
//! dropped is only referenced by the set, so the cache can find and release
//! abandoned holds.

use crate::cache::buffer::TileBuffer;
use crate::cache::key::TileKey;
use crate::cache::owner::OwnerId;
use crate::cache::types::{CacheError, SharedTile, TileView};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness of one granted checkout.
#[derive(Debug)]
pub(crate) struct CheckoutToken {
    active: AtomicBool,
}

impl CheckoutToken {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Result of a release request that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Contents persisted and the hold cleared.
    Released,
    /// No matching hold. The request was ignored.
    NotCheckedOut,
    /// A write guard was alive. Nothing was persisted and the hold stays.
    WriterActive,
}

impl ReleaseOutcome {
    pub fn is_released(self) -> bool {
        self == ReleaseOutcome::Released
    }
}

/// Keys currently held by a writer.
#[derive(Debug, Default)]
pub(crate) struct CheckoutSet {
    held: BTreeMap<TileKey, Arc<CheckoutToken>>,
}

impl CheckoutSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hold `key`. Returns `None` if another writer already holds it.
    pub(crate) fn try_acquire(&mut self, key: TileKey) -> Option<Arc<CheckoutToken>> {
        if self.held.contains_key(&key) {
            return None;
        }
        let token = Arc::new(CheckoutToken::new());
        self.held.insert(key, Arc::clone(&token));
        Some(token)
    }

    pub(crate) fn token(&self, key: &TileKey) -> Option<&Arc<CheckoutToken>> {
        self.held.get(key)
    }

    /// Clear the hold on `key` and deactivate its token. Returns `false` if
    /// it was not held.
    pub(crate) fn release(&mut self, key: &TileKey) -> bool {
        match self.held.remove(key) {
            Some(token) => {
                token.deactivate();
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, key: &TileKey) -> bool {
        self.held.contains_key(key)
    }

    /// Held keys whose handle no longer exists.
    pub(crate) fn abandoned(&self) -> Vec<TileKey> {
        self.held
            .iter()
            .filter(|(_, token)| Arc::strong_count(token) == 1)
            .map(|(key, _)| *key)
            .collect()
    }

    /// Held keys in key order.
    pub(crate) fn keys(&self) -> Vec<TileKey> {
        self.held.keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.held.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        for token in self.held.values() {
            token.deactivate();
        }
        self.held.clear();
    }
}

/// Write access to a checked-out tile.
///
/// The tile stays excluded from eviction until it is released through the
/// cache. Once released, by handle or by coordinates, [`write`](Self::write)
/// fails with [`CacheError::CheckoutReleased`]. Dropping the handle without
/// releasing it lets the cache release the tile at its next operation.
#[derive(Debug)]
pub struct TileWriteHandle {
    key: TileKey,
    owner: OwnerId,
    grid: (i32, i32),
    tile: SharedTile,
    token: Arc<CheckoutToken>,
}

impl TileWriteHandle {
    pub(crate) fn new(
        key: TileKey,
        owner: OwnerId,
        grid: (i32, i32),
        tile: SharedTile,
        token: Arc<CheckoutToken>,
    ) -> Self {
        Self {
            key,
            owner,
            grid,
            tile,
            token,
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn grid(&self) -> (i32, i32) {
        self.grid
    }

    /// Exclusive write lock on the buffer.
    ///
    /// The lock is taken before the hold is checked. A release persists
    /// under a read lock and clears the hold before dropping it, so a guard
    /// returned here can never be overtaken by a release.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, TileBuffer>, CacheError> {
        let guard = self.tile.write();
        if !self.token.is_active() {
            return Err(CacheError::CheckoutReleased(self.key));
        }
        Ok(guard)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TileBuffer> {
        self.tile.read()
    }

    /// Whether this handle still holds the checkout.
    pub fn is_held(&self) -> bool {
        self.token.is_active()
    }

    /// A read-only view of the same buffer.
    pub fn view(&self) -> TileView {
        TileView::new(Arc::clone(&self.tile))
    }

    pub(crate) fn token(&self) -> &Arc<CheckoutToken> {
        &self.token
    }
}
