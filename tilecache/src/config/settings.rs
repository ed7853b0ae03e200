//! [`TileCacheConfig`] and its defaults.

use crate::cache::CacheError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 64 MiB of resident tile memory.
pub const DEFAULT_MEMORY_CAPACITY: u64 = 64 * 1024 * 1024;

/// Fraction of capacity that `memory_control` trims down to.
pub const DEFAULT_MEMORY_THRESHOLD: f32 = 0.75;

/// Per-subscriber event queue length.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Whether a freshly added tile is made resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResidencyPolicy {
    /// Admit, evicting older tiles if needed.
    Always,
    /// Admit only if the tile fits in free capacity.
    #[default]
    Try,
    /// Only persist to disk; the first `get` loads it.
    Never,
}

impl fmt::Display for ResidencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResidencyPolicy::Always => "always",
            ResidencyPolicy::Try => "try",
            ResidencyPolicy::Never => "never",
        };
        f.write_str(s)
    }
}

impl FromStr for ResidencyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(ResidencyPolicy::Always),
            "try" => Ok(ResidencyPolicy::Try),
            "never" => Ok(ResidencyPolicy::Never),
            other => Err(format!("unknown residency policy '{}'", other)),
        }
    }
}

/// Construction-time options for a [`crate::cache::TileCache`].
#[derive(Debug, Clone, PartialEq)]
pub struct TileCacheConfig {
    /// Resident memory budget in bytes.
    pub initial_memory_capacity: u64,
    /// Residency rule applied by `add`.
    pub new_tile_residency: ResidencyPolicy,
    /// Enables threshold trimming in `memory_control`.
    pub use_memory_threshold: bool,
    /// Target fraction of capacity after a trim, in `[0, 1]`.
    pub memory_threshold: f32,
    /// Directory that holds one backing file per tile.
    pub spill_dir: PathBuf,
    /// Background `memory_control` interval in seconds (0 disables the daemon).
    pub control_interval_secs: u64,
    /// Default queue length for event subscribers.
    pub event_queue_capacity: usize,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            initial_memory_capacity: DEFAULT_MEMORY_CAPACITY,
            new_tile_residency: ResidencyPolicy::default(),
            use_memory_threshold: false,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            spill_dir: std::env::temp_dir().join("tilecache"),
            control_interval_secs: 0,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

impl TileCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_capacity(mut self, bytes: u64) -> Self {
        self.initial_memory_capacity = bytes;
        self
    }

    pub fn with_residency(mut self, policy: ResidencyPolicy) -> Self {
        self.new_tile_residency = policy;
        self
    }

    /// Enable threshold trimming at `fraction` of capacity.
    pub fn with_memory_threshold(mut self, fraction: f32) -> Self {
        self.use_memory_threshold = true;
        self.memory_threshold = fraction;
        self
    }

    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = dir.into();
        self
    }

    pub fn with_control_interval(mut self, secs: u64) -> Self {
        self.control_interval_secs = secs;
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Reject values the cache cannot operate with.
    pub fn validate(&self) -> Result<(), CacheError> {
        if !(0.0..=1.0).contains(&self.memory_threshold) {
            return Err(CacheError::InvalidConfig(format!(
                "memory_threshold must be within [0, 1], got {}",
                self.memory_threshold
            )));
        }
        if self.event_queue_capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "event_queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TileCacheConfig::default();
        assert_eq!(config.initial_memory_capacity, 64 * 1024 * 1024);
        assert_eq!(config.new_tile_residency, ResidencyPolicy::Try);
        assert!(!config.use_memory_threshold);
        assert_eq!(config.memory_threshold, 0.75);
        assert_eq!(config.control_interval_secs, 0);
        assert!(config.spill_dir.ends_with("tilecache"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = TileCacheConfig::new()
            .with_memory_capacity(3 * 4096)
            .with_residency(ResidencyPolicy::Always)
            .with_memory_threshold(0.5)
            .with_spill_dir("/var/tmp/tiles")
            .with_control_interval(5)
            .with_event_queue_capacity(16);

        assert_eq!(config.initial_memory_capacity, 12288);
        assert_eq!(config.new_tile_residency, ResidencyPolicy::Always);
        assert!(config.use_memory_threshold);
        assert_eq!(config.memory_threshold, 0.5);
        assert_eq!(config.spill_dir, PathBuf::from("/var/tmp/tiles"));
        assert_eq!(config.control_interval_secs, 5);
        assert_eq!(config.event_queue_capacity, 16);
    }

    #[test]
    fn test_validate_threshold_range() {
        assert!(TileCacheConfig::new().with_memory_threshold(1.5).validate().is_err());
        assert!(TileCacheConfig::new().with_memory_threshold(-0.1).validate().is_err());
        assert!(TileCacheConfig::new().with_memory_threshold(0.0).validate().is_ok());
        assert!(TileCacheConfig::new().with_memory_threshold(f32::NAN).validate().is_err());
    }

    #[test]
    fn test_validate_queue_capacity() {
        let config = TileCacheConfig::new().with_event_queue_capacity(0);
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_residency_policy_parse() {
        assert_eq!("ALWAYS".parse::<ResidencyPolicy>(), Ok(ResidencyPolicy::Always));
        assert_eq!(" try ".parse::<ResidencyPolicy>(), Ok(ResidencyPolicy::Try));
        assert_eq!("never".parse::<ResidencyPolicy>(), Ok(ResidencyPolicy::Never));
        assert!("sometimes".parse::<ResidencyPolicy>().is_err());
        assert_eq!(ResidencyPolicy::Never.to_string(), "never");
    }
}
