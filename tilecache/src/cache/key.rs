//! Tile identity.
//!
//! A [`TileKey`] packs the owner identifier into the high bits and the grid
//! column/row into the low bits of a 128-bit integer. Owners identified by a
//! 256-bit digest get a wide key instead, so the digest is never truncated.
//! Collisions are not detected at runtime: the packing is injective for
//! numeric owners and relies on digest uniqueness for wide ones.

use crate::cache::owner::OwnerId;
use std::fmt;

/// Stable, totally ordered identity of one tile of one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TileKey {
    /// `owner << 64 | column << 32 | row`.
    Packed(u128),
    /// Digest owner plus packed grid position.
    Wide { owner: [u8; 32], grid: u64 },
}

/// Derive the key of tile (`grid_x`, `grid_y`) of `owner`.
///
/// ```
/// use tilecache::cache::{compute_key, OwnerId};
///
/// let a = compute_key(&OwnerId::Numeric(7), 1, 2);
/// let b = compute_key(&OwnerId::Numeric(7), 2, 1);
/// assert_ne!(a, b);
/// assert_eq!(a.grid(), (1, 2));
/// ```
pub fn compute_key(owner: &OwnerId, grid_x: i32, grid_y: i32) -> TileKey {
    let grid = pack_grid(grid_x, grid_y);
    match owner {
        OwnerId::Numeric(id) => TileKey::Packed(((*id as u128) << 64) | grid as u128),
        OwnerId::Digest(digest) => TileKey::Wide {
            owner: *digest,
            grid,
        },
    }
}

fn pack_grid(grid_x: i32, grid_y: i32) -> u64 {
    ((grid_x as u32 as u64) << 32) | grid_y as u32 as u64
}

impl TileKey {
    fn grid_bits(&self) -> u64 {
        match self {
            TileKey::Packed(bits) => *bits as u64,
            TileKey::Wide { grid, .. } => *grid,
        }
    }

    /// Grid column and row encoded in the key.
    pub fn grid(&self) -> (i32, i32) {
        let bits = self.grid_bits();
        ((bits >> 32) as u32 as i32, bits as u32 as i32)
    }

    /// Owner identifier encoded in the key.
    pub fn owner(&self) -> OwnerId {
        match self {
            TileKey::Packed(bits) => OwnerId::Numeric((bits >> 64) as u64),
            TileKey::Wide { owner, .. } => OwnerId::Digest(*owner),
        }
    }

    /// True if this key belongs to `owner`.
    pub fn belongs_to(&self, owner: &OwnerId) -> bool {
        self.owner() == *owner
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y) = self.grid();
        write!(f, "{}@{},{}", self.owner(), x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_is_deterministic() {
        let owner = OwnerId::Numeric(42);
        assert_eq!(compute_key(&owner, 3, 9), compute_key(&owner, 3, 9));
    }

    #[test]
    fn test_negative_grid_round_trips() {
        let key = compute_key(&OwnerId::Numeric(1), -5, i32::MIN);
        assert_eq!(key.grid(), (-5, i32::MIN));
        assert_eq!(key.owner(), OwnerId::Numeric(1));
    }

    #[test]
    fn test_swapped_coordinates_differ() {
        let owner = OwnerId::Numeric(0);
        assert_ne!(compute_key(&owner, 0, 1), compute_key(&owner, 1, 0));
    }

    #[test]
    fn test_owners_do_not_collide() {
        let a = compute_key(&OwnerId::Numeric(1), 0, 0);
        let b = compute_key(&OwnerId::Numeric(2), 0, 0);
        assert_ne!(a, b);
        assert!(a.belongs_to(&OwnerId::Numeric(1)));
        assert!(!a.belongs_to(&OwnerId::Numeric(2)));
    }

    #[test]
    fn test_wide_key_keeps_full_digest() {
        let d1 = OwnerId::from_identity_bytes(b"raster-a");
        let d2 = OwnerId::from_identity_bytes(b"raster-b");
        let k1 = compute_key(&d1, 4, 4);
        let k2 = compute_key(&d2, 4, 4);
        assert_ne!(k1, k2);
        assert_eq!(k1.owner(), d1);
        assert_eq!(k1.grid(), (4, 4));
    }

    #[test]
    fn test_keys_are_ordered_by_owner_then_grid() {
        let owner = OwnerId::Numeric(5);
        let mut keys = vec![
            compute_key(&OwnerId::Numeric(6), 0, 0),
            compute_key(&owner, 1, 0),
            compute_key(&owner, 0, 1),
        ];
        keys.sort();
        assert_eq!(keys[0].grid(), (0, 1));
        assert_eq!(keys[1].grid(), (1, 0));
        assert_eq!(keys[2].owner(), OwnerId::Numeric(6));
    }

    #[test]
    fn test_display() {
        let key = compute_key(&OwnerId::Numeric(255), 2, -1);
        assert_eq!(key.to_string(), "owner:ff@2,-1");
    }

    #[test]
    fn test_grid_sweep_is_injective() {
        let mut seen = HashSet::new();
        for owner in 0..4u64 {
            for x in -8..8 {
                for y in -8..8 {
                    assert!(seen.insert(compute_key(&OwnerId::Numeric(owner), x, y)));
                }
            }
        }
    }

    proptest! {
        #[test]
        fn prop_key_decodes_to_inputs(owner in any::<u64>(), x in any::<i32>(), y in any::<i32>()) {
            let key = compute_key(&OwnerId::Numeric(owner), x, y);
            prop_assert_eq!(key.owner(), OwnerId::Numeric(owner));
            prop_assert_eq!(key.grid(), (x, y));
        }

        #[test]
        fn prop_distinct_triples_distinct_keys(
            a in (any::<u64>(), any::<i32>(), any::<i32>()),
            b in (any::<u64>(), any::<i32>(), any::<i32>()),
        ) {
            let ka = compute_key(&OwnerId::Numeric(a.0), a.1, a.2);
            let kb = compute_key(&OwnerId::Numeric(b.0), b.1, b.2);
            prop_assert_eq!(a == b, ka == kb);
        }
    }
}
