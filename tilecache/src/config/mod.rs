//! Cache configuration: defaults, builder methods and INI loading.

mod file;
mod settings;
mod size;

pub use file::ConfigFileError;
pub use settings::{
    ResidencyPolicy, TileCacheConfig, DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_MEMORY_CAPACITY,
    DEFAULT_MEMORY_THRESHOLD,
};
pub use size::{format_size, parse_size, SizeParseError};
