//! Loading [`TileCacheConfig`] from an INI file.
//!
//! ```ini
//! [tile_cache]
//! memory_capacity = 256MB
//! residency = always
//! use_memory_threshold = true
//! memory_threshold = 0.6
//! spill_dir = /var/tmp/tiles
//! control_interval = 10
//! ```

use super::settings::{ResidencyPolicy, TileCacheConfig};
use super::size::parse_size;
use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SECTION: &str = "tile_cache";

/// Errors raised while reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] ini::Error),

    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: SECTION.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, value, "must be true or false")),
    }
}

impl TileCacheConfig {
    /// Load from `path`, returning defaults when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    /// Overlay the `[tile_cache]` section of `ini` onto the defaults.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigFileError> {
        let mut config = Self::default();
        let Some(section) = ini.section(Some(SECTION)) else {
            return Ok(config);
        };

        if let Some(v) = section.get("memory_capacity") {
            config.initial_memory_capacity = parse_size(v)
                .map_err(|_| invalid("memory_capacity", v, "expected format like '64MB' or '1GB'"))?;
        }
        if let Some(v) = section.get("residency") {
            config.new_tile_residency = v
                .parse::<ResidencyPolicy>()
                .map_err(|_| invalid("residency", v, "must be one of: always, try, never"))?;
        }
        if let Some(v) = section.get("use_memory_threshold") {
            config.use_memory_threshold = parse_bool("use_memory_threshold", v)?;
        }
        if let Some(v) = section.get("memory_threshold") {
            let fraction: f32 = v
                .trim()
                .parse()
                .map_err(|_| invalid("memory_threshold", v, "must be a number in [0, 1]"))?;
            if !(0.0..=1.0).contains(&fraction) {
                return Err(invalid("memory_threshold", v, "must be a number in [0, 1]"));
            }
            config.memory_threshold = fraction;
        }
        if let Some(v) = section.get("spill_dir") {
            let v = v.trim();
            if !v.is_empty() {
                config.spill_dir = PathBuf::from(v);
            }
        }
        if let Some(v) = section.get("control_interval") {
            config.control_interval_secs = v
                .trim()
                .parse()
                .map_err(|_| invalid("control_interval", v, "must be a whole number of seconds"))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = TileCacheConfig::load_from(&dir.path().join("absent.ini")).unwrap();
        assert_eq!(config, TileCacheConfig::default());
    }

    #[test]
    fn test_load_full_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.ini");
        fs::write(
            &path,
            "[tile_cache]\nmemory_capacity = 256MB\nresidency = always\n\
             use_memory_threshold = yes\nmemory_threshold = 0.6\n\
             spill_dir = /var/tmp/tiles\ncontrol_interval = 10\n",
        )
        .unwrap();

        let config = TileCacheConfig::load_from(&path).unwrap();
        assert_eq!(config.initial_memory_capacity, 256 * 1024 * 1024);
        assert_eq!(config.new_tile_residency, ResidencyPolicy::Always);
        assert!(config.use_memory_threshold);
        assert!((config.memory_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.spill_dir, PathBuf::from("/var/tmp/tiles"));
        assert_eq!(config.control_interval_secs, 10);
    }

    #[test]
    fn test_other_sections_ignored() {
        let mut ini = Ini::new();
        ini.with_section(Some("display")).set("theme", "dark");
        let config = TileCacheConfig::from_ini(&ini).unwrap();
        assert_eq!(config, TileCacheConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            ("memory_capacity", "lots"),
            ("residency", "maybe"),
            ("use_memory_threshold", "perhaps"),
            ("memory_threshold", "1.2"),
            ("memory_threshold", "abc"),
            ("control_interval", "-3"),
        ];
        for (key, value) in cases {
            let mut ini = Ini::new();
            ini.with_section(Some(SECTION)).set(key, value);
            match TileCacheConfig::from_ini(&ini) {
                Err(ConfigFileError::InvalidValue { key: k, .. }) => assert_eq!(k, key),
                other => panic!("{} = {} should be rejected, got {:?}", key, value, other),
            }
        }
    }
}
