//! Logging seam for cache components.
//!
//! Cache code never calls a logging backend directly. It holds an
//! `Arc<dyn Logger>` and writes through the `log_*` macros, so tests can swap
//! in a silent or capturing logger while production wires up `tracing`.
//!
//! ```
//! use std::sync::Arc;
//! use tilecache::log::{Logger, NoOpLogger};
//! use tilecache::log_info;
//!
//! let logger: Arc<dyn Logger> = Arc::new(NoOpLogger);
//! log_info!(logger, "spill directory ready: {}", "/tmp/tiles");
//! ```

mod capture;
mod tracing_adapter;
mod r#trait;

pub use capture::{CaptureLogger, CapturedLine, NoOpLogger};
pub use r#trait::{LogLevel, Logger};
pub use tracing_adapter::TracingLogger;
