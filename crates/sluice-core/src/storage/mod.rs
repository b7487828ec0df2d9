//! Storage backends for intake directories.
//!
//! A backend exposes the three capabilities the record source needs: list a
//! directory's files, read one file whole, and move a file between directories.
//! Every call is instrumented with `StorageRequest` and `StorageRequestDuration`.

mod local;
mod memory;
mod sftp;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use sftp::{AuthMethod, SftpBackend, SftpConfig, auth_methods};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::emit;
use crate::error::StorageError;
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration};

/// A shareable backend handle.
pub type BackendRef = Arc<dyn StorageBackend>;

/// One file found by a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name, relative to the listed directory.
    pub name: String,
    /// Size in bytes as reported by the backend.
    pub size: u64,
}

/// List, read and move files in flat directories.
///
/// Directories are plain strings: filesystem paths for the local backend,
/// remote paths for SFTP. Listings never include sub-directories, and their
/// order is whatever the backend returns.
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// List the files directly inside `dir`.
    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>, StorageError>;

    /// Read the whole of `dir/name`.
    async fn open(&self, dir: &str, name: &str) -> Result<Bytes, StorageError>;

    /// Move `from_dir/name` to `to_dir/name`.
    async fn rename(&self, from_dir: &str, to_dir: &str, name: &str) -> Result<(), StorageError>;

    /// Short backend label used in metrics (`local`, `sftp`, `memory`).
    fn kind(&self) -> &'static str;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Which backend an intake directory lives on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    #[default]
    Local,
    Sftp(SftpConfig),
}

impl BackendConfig {
    /// Construct the configured backend. Remote connections are established lazily.
    pub fn build(&self) -> BackendRef {
        match self {
            BackendConfig::Local => Arc::new(LocalBackend::new()),
            BackendConfig::Sftp(config) => Arc::new(SftpBackend::new(config.clone())),
        }
    }
}

/// Join a directory and a file name with `/`.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Await a storage future and record its outcome and latency.
pub(crate) async fn observe<T>(
    backend: &'static str,
    operation: StorageOperation,
    request: impl Future<Output = Result<T, StorageError>>,
) -> Result<T, StorageError> {
    let start = Instant::now();
    let result = request.await;

    let status = if result.is_ok() {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest {
        operation,
        status,
        backend,
    });
    emit!(StorageRequestDuration {
        operation,
        backend,
        duration: start.elapsed(),
    });

    result
}
