//! Cache counters and reporting.

use crate::config::format_size;
use std::time::{Duration, Instant};

/// Running counters, updated under the cache lock.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// `get` served from a live resident buffer.
    pub hits: u64,
    /// `get` for a tile with no record.
    pub misses: u64,
    /// Buffers reloaded from backing files.
    pub reloads: u64,
    pub reload_failures: u64,
    /// Resident buffers found emptied by memory pressure.
    pub reclaimed: u64,
    pub evictions: u64,
    pub disk_writes: u64,
    pub disk_write_failures: u64,
    /// Admissions refused with a capacity error.
    pub capacity_failures: u64,
    pub checkouts: u64,
    pub rejected_checkouts: u64,
    pub releases: u64,
    pub invalid_releases: u64,
    /// Releases deferred because a write guard was alive.
    pub busy_releases: u64,
    /// Checkouts released after their handle was dropped.
    pub abandoned_releases: u64,
    pub created_at: Instant,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            hits: 0,
            misses: 0,
            reloads: 0,
            reload_failures: 0,
            reclaimed: 0,
            evictions: 0,
            disk_writes: 0,
            disk_write_failures: 0,
            capacity_failures: 0,
            checkouts: 0,
            rejected_checkouts: 0,
            releases: 0,
            invalid_releases: 0,
            busy_releases: 0,
            abandoned_releases: 0,
            created_at: Instant::now(),
        }
    }

    /// Fraction of `get` calls served from memory (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.reloads + self.reload_failures + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Snapshot of counters plus current occupancy.
#[derive(Debug, Clone)]
pub struct CacheStatistics {
    pub stats: CacheStats,
    pub tile_count: usize,
    pub resident_count: usize,
    pub checked_out_count: usize,
    pub memory_usage: u64,
    pub memory_capacity: u64,
    pub dropped_events: u64,
    pub hit_rate_percent: f64,
}

impl CacheStatistics {
    /// Human-readable report.
    pub fn format(&self) -> String {
        let s = &self.stats;
        format!(
            r#"Tile Cache Statistics

RESIDENCY
  Tiles:       {} ({} resident, {} checked out)
  Memory:      {} / {}
  Hit Rate:    {:.1}%
  Hits:        {}
  Misses:      {}
  Evictions:   {}
  Reclaimed:   {}

BACKING STORE
  Reloads:     {} ({} failed)
  Writes:      {} ({} failed)

CHECKOUT
  Granted:     {}
  Rejected:    {}
  Released:    {} ({} invalid, {} busy, {} abandoned)

  Capacity failures: {}
  Dropped events:    {}
  Uptime:            {}s
"#,
            self.tile_count,
            self.resident_count,
            self.checked_out_count,
            format_size(self.memory_usage),
            format_size(self.memory_capacity),
            self.hit_rate_percent,
            s.hits,
            s.misses,
            s.evictions,
            s.reclaimed,
            s.reloads,
            s.reload_failures,
            s.disk_writes,
            s.disk_write_failures,
            s.checkouts,
            s.rejected_checkouts,
            s.releases,
            s.invalid_releases,
            s.busy_releases,
            s.abandoned_releases,
            s.capacity_failures,
            self.dropped_events,
            s.uptime().as_secs(),
        )
    }
}
