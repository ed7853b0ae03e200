//! Victim selection for resident tiles.
//!
//! Planning is pure: the cache gathers [`Candidate`]s under its lock, asks for
//! a plan, and applies it only if the plan succeeds. A failed plan therefore
//! leaves the cache untouched.

use crate::cache::key::TileKey;
use crate::cache::types::CacheError;

/// How an admission may make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitMode {
    /// Admit only into free capacity.
    NoSwap,
    /// Evict least-recently-accessed tiles until the tile fits.
    Force,
}

/// A resident tile considered for eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: TileKey,
    pub access_stamp: u64,
    pub byte_size: u64,
    pub checked_out: bool,
}

/// Tiles to demote, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    pub victims: Vec<TileKey>,
    pub freed: u64,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }
}

/// Result of planning an admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Room already exists.
    Fits,
    /// Room exists after applying the plan.
    Evict(EvictionPlan),
    /// No-swap admission without room. Not an error.
    Rejected,
}

/// Evictable candidates, least recently accessed first, ties by key.
fn evictable(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.retain(|c| !c.checked_out);
    candidates.sort_by(|a, b| {
        a.access_stamp
            .cmp(&b.access_stamp)
            .then_with(|| a.key.cmp(&b.key))
    });
    candidates
}

/// Plan room for a tile of `required` bytes.
///
/// `soft_target` is the threshold usage that a forced admission trims down
/// to once it has to evict anyway; only the hard limit
/// `usage + required <= capacity` is mandatory.
pub fn plan_admission(
    required: u64,
    usage: u64,
    capacity: u64,
    soft_target: Option<u64>,
    candidates: Vec<Candidate>,
    mode: AdmitMode,
) -> Result<Admission, CacheError> {
    if required <= capacity.saturating_sub(usage) {
        return Ok(Admission::Fits);
    }
    if mode == AdmitMode::NoSwap {
        return Ok(Admission::Rejected);
    }

    let candidates = evictable(candidates);
    let evictable_bytes: u64 = candidates.iter().map(|c| c.byte_size).sum();
    let exceeded = CacheError::CapacityExceeded {
        required,
        capacity,
        evictable: evictable_bytes,
    };
    if required > capacity {
        return Err(exceeded);
    }

    let hard_target = capacity - required;
    let target = soft_target.map_or(hard_target, |soft| soft.min(hard_target));
    let plan = take_until(usage, target, candidates);

    if usage.saturating_sub(plan.freed) > hard_target {
        return Err(exceeded);
    }
    Ok(Admission::Evict(plan))
}

/// Best-effort plan to bring `usage` down to `target`.
pub fn plan_trim(usage: u64, target: u64, candidates: Vec<Candidate>) -> EvictionPlan {
    if usage <= target {
        return EvictionPlan::default();
    }
    take_until(usage, target, evictable(candidates))
}

/// Plan that drops the `bytes` oldest evictable bytes, ignoring capacity.
pub fn plan_reclaim(bytes: u64, candidates: Vec<Candidate>) -> EvictionPlan {
    let mut plan = EvictionPlan::default();
    for candidate in evictable(candidates) {
        if plan.freed >= bytes {
            break;
        }
        plan.freed += candidate.byte_size;
        plan.victims.push(candidate.key);
    }
    plan
}

fn take_until(usage: u64, target: u64, ordered: Vec<Candidate>) -> EvictionPlan {
    let mut plan = EvictionPlan::default();
    for candidate in ordered {
        if usage.saturating_sub(plan.freed) <= target {
            break;
        }
        plan.freed += candidate.byte_size;
        plan.victims.push(candidate.key);
    }
    plan
}
