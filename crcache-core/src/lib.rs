//! crcache core - Compute Resource Cache
//!
//! Client programs acquire compute resources (the local machine, an ssh host,
//! or slots in a composite pool) and later release them, without binding to
//! the backend that provides them.
//!
//! # Layers:
//! - [`store`]: lock-guarded key-value state shared by every process on the host
//! - [`source`]: backends that create, destroy and run commands on resources
//! - [`engine`]: the watermarked [`ResourcePool`] and the [`PoolRegistry`]
//! - [`config`]: per-source settings found on the config search path

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod source;
pub mod store;

pub use config::{Config, SourceConfig};
pub use engine::{PoolRegistry, PoolStatus, ResourcePool};
pub use error::{Error, Result};
pub use executor::{ExecMode, ExecutionResult, ProcessExecutor};
pub use source::Source;
pub use store::{LocalStore, MemoryStore, Store};

use tracing_subscriber::EnvFilter;

/// Install the stderr log subscriber, filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
