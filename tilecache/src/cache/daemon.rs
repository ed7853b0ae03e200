//! Background memory control.
//!
//! The daemon runs in its own thread and periodically calls
//! [`TileCache::memory_control`], trimming residency down to the configured
//! threshold (or capacity) without waiting for the next forced admission.

use crate::cache::system::TileCache;
use crate::config::format_size;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest sleep between shutdown checks.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Periodic `memory_control` runner.
///
/// Stops when `shutdown()` is called or the daemon is dropped.
pub struct MemoryControlDaemon {
    thread_handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl MemoryControlDaemon {
    /// Start trimming `cache` every `interval`.
    pub fn start(cache: Arc<TileCache>, interval: Duration) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let thread_handle = thread::Builder::new()
            .name("tile-memory-control".to_string())
            .spawn(move || {
                Self::run_loop(cache, interval, shutdown_clone);
            })?;

        info!("Memory control daemon started (interval: {:?})", interval);

        Ok(Self {
            thread_handle: Some(thread_handle),
            shutdown,
        })
    }

    fn run_loop(cache: Arc<TileCache>, interval: Duration, shutdown: Arc<AtomicBool>) {
        let check_interval = interval.min(SHUTDOWN_POLL).max(Duration::from_millis(1));
        let mut elapsed = Duration::ZERO;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                debug!("Memory control daemon received shutdown signal");
                break;
            }

            thread::sleep(check_interval);
            elapsed += check_interval;

            if elapsed >= interval {
                elapsed = Duration::ZERO;
                let evicted = cache.memory_control();
                if evicted > 0 {
                    debug!(
                        "Memory control evicted {} tiles, usage {} / {}",
                        evicted,
                        format_size(cache.memory_usage()),
                        format_size(cache.get_memory_capacity())
                    );
                }
            }
        }

        debug!("Memory control daemon stopped");
    }

    /// Signal the daemon to stop. Non-blocking; follow with `join()`.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                warn!("Memory control daemon thread panicked: {:?}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for MemoryControlDaemon {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}
