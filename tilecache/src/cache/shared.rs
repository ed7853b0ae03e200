//! Process-wide cache handle.
//!
//! Components that need a cache but do not own one share a [`SharedCache`].
//! The cache is created on first use and, when the configuration asks for a
//! control interval, gets a [`MemoryControlDaemon`] alongside it.

use crate::cache::daemon::MemoryControlDaemon;
use crate::cache::system::TileCache;
use crate::cache::types::CacheError;
use crate::config::TileCacheConfig;
use crate::log::Logger;
use crate::log_info;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct Running {
    cache: Arc<TileCache>,
    daemon: Option<MemoryControlDaemon>,
}

/// Lazily created cache shared by reference.
pub struct SharedCache {
    config: TileCacheConfig,
    logger: Arc<dyn Logger>,
    running: Mutex<Option<Running>>,
}

impl SharedCache {
    pub fn new(config: TileCacheConfig, logger: Arc<dyn Logger>) -> Self {
        Self {
            config,
            logger,
            running: Mutex::new(None),
        }
    }

    /// The cache, creating it on first call.
    pub fn get(&self) -> Result<Arc<TileCache>, CacheError> {
        let mut running = self.running.lock();
        if let Some(running) = running.as_ref() {
            return Ok(Arc::clone(&running.cache));
        }

        let cache = Arc::new(TileCache::with_logger(
            self.config.clone(),
            Arc::clone(&self.logger),
        )?);
        let daemon = match self.config.control_interval_secs {
            0 => None,
            secs => Some(MemoryControlDaemon::start(
                Arc::clone(&cache),
                Duration::from_secs(secs),
            )?),
        };

        *running = Some(Running {
            cache: Arc::clone(&cache),
            daemon,
        });
        Ok(cache)
    }

    pub fn is_initialized(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn has_daemon(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| running.daemon.is_some())
    }

    /// Stop the daemon and flush the cache. A later `get` starts afresh.
    pub fn shutdown(&self) {
        let Some(mut running) = self.running.lock().take() else {
            return;
        };
        if let Some(mut daemon) = running.daemon.take() {
            daemon.shutdown();
            daemon.join();
        }
        running.cache.flush();
        log_info!(self.logger, "Shared tile cache shut down");
    }
}

impl Drop for SharedCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::buffer::{ElementType, SampleLayout, TileBuffer};
    use crate::cache::owner::{OwnerId, TileOwner};
    use crate::log::NoOpLogger;
    use tempfile::TempDir;

    fn shared(dir: &TempDir, interval: u64) -> SharedCache {
        let config = TileCacheConfig::new()
            .with_spill_dir(dir.path())
            .with_control_interval(interval);
        SharedCache::new(config, Arc::new(NoOpLogger))
    }

    #[test]
    fn test_lazy_creation_returns_same_cache() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, 0);
        assert!(!shared.is_initialized());

        let a = shared.get().unwrap();
        let b = shared.get().unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(shared.is_initialized());
        assert!(!shared.has_daemon());
    }

    #[test]
    fn test_control_interval_starts_daemon() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, 30);
        shared.get().unwrap();
        assert!(shared.has_daemon());
        shared.shutdown();
        assert!(!shared.is_initialized());
    }

    #[test]
    fn test_shutdown_flushes() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, 0);
        let cache = shared.get().unwrap();
        let owner = TileOwner::new(
            OwnerId::Numeric(1),
            SampleLayout::new(ElementType::U8, 1, 4),
            2,
            2,
        );
        cache
            .add(&owner, 0, 0, TileBuffer::from_samples(vec![1u8; 4]), None)
            .unwrap();

        shared.shutdown();

        assert_eq!(cache.tile_count(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = TileCacheConfig::new()
            .with_spill_dir(dir.path())
            .with_event_queue_capacity(0);
        let shared = SharedCache::new(config, Arc::new(NoOpLogger));
        assert!(matches!(shared.get(), Err(CacheError::InvalidConfig(_))));
        assert!(!shared.is_initialized());
    }
}
