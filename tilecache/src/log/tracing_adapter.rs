//! Bridge from [`Logger`] to the `tracing` ecosystem.

use crate::log::{LogLevel, Logger};
use std::fmt::Arguments;

/// Logger that forwards every line to the matching `tracing` macro.
///
/// Output only appears once a subscriber is installed, for example via
/// [`crate::logging::init_logging`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, args: Arguments<'_>) {
        match level {
            LogLevel::Trace => tracing::trace!(target: "tilecache", "{}", args),
            LogLevel::Debug => tracing::debug!(target: "tilecache", "{}", args),
            LogLevel::Info => tracing::info!(target: "tilecache", "{}", args),
            LogLevel::Warn => tracing::warn!(target: "tilecache", "{}", args),
            LogLevel::Error => tracing::error!(target: "tilecache", "{}", args),
        }
    }
}
