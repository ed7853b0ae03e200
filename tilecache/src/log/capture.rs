//! Loggers that do not write to a backend.

use crate::log::{LogLevel, Logger};
use parking_lot::Mutex;
use std::fmt::Arguments;

/// Discards every line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    #[inline]
    fn log(&self, _level: LogLevel, _args: Arguments<'_>) {}
}

/// One line recorded by a [`CaptureLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLine {
    pub level: LogLevel,
    pub message: String,
}

/// Keeps every line in memory so callers can assert on diagnostics.
#[derive(Debug, Default)]
pub struct CaptureLogger {
    lines: Mutex<Vec<CapturedLine>>,
}

impl CaptureLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything logged so far.
    pub fn lines(&self) -> Vec<CapturedLine> {
        self.lines.lock().clone()
    }

    /// Lines logged at exactly `level`.
    pub fn at_level(&self, level: LogLevel) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|line| line.level == level)
            .map(|line| line.message.clone())
            .collect()
    }

    /// True if any line at `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|line| line.level == level && line.message.contains(needle))
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl Logger for CaptureLogger {
    fn log(&self, level: LogLevel, args: Arguments<'_>) {
        self.lines.lock().push(CapturedLine {
            level,
            message: args.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{log_info, log_warn};
    use std::sync::Arc;

    #[test]
    fn test_noop_logger_as_trait_object() {
        let logger: Arc<dyn Logger> = Arc::new(NoOpLogger);
        log_info!(logger, "discarded {}", 1);
    }

    #[test]
    fn test_capture_logger_records_levels() {
        let logger = CaptureLogger::new();
        log_info!(logger, "added tile {}", 3);
        log_warn!(logger, "tile {} not checked out", 4);

        assert_eq!(logger.lines().len(), 2);
        assert_eq!(logger.at_level(LogLevel::Warn), vec!["tile 4 not checked out"]);
        assert!(logger.contains(LogLevel::Info, "added tile 3"));
        assert!(!logger.contains(LogLevel::Error, "tile"));
    }

    #[test]
    fn test_capture_logger_clear() {
        let logger = CaptureLogger::new();
        log_info!(logger, "x");
        logger.clear();
        assert!(logger.lines().is_empty());
    }
}
