//! sluice-core: plumbing shared by the sluice binaries.
//!
//! - `storage/` - the `StorageBackend` capability set (list, open, rename) with
//!   local filesystem, SFTP and in-memory implementations
//! - `metrics/` - internal events, the `emit!` macro and the Prometheus endpoint
//! - `config/` - environment interpolation, YAML loading and metrics settings
//! - `signal` - shutdown signal handling
//! - `tracing` - subscriber initialization
//! - `error` - storage, configuration and metrics errors

pub mod config;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod storage;
pub mod tracing;

pub use config::{MetricsConfig, interpolate, parse_yaml, read_yaml};
pub use error::{ConfigError, MetricsError, StorageError};
pub use metrics::{MetricsController, init_global as init_metrics, init_test as init_metrics_test};
pub use signal::{shutdown_signal, shutdown_token};
pub use storage::{BackendConfig, BackendRef, DirEntry, LocalBackend, MemoryBackend, SftpBackend, SftpConfig, StorageBackend};
pub use tracing::init_tracing;
