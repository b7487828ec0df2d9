//! Moving consumed files out of the intake directory.
//!
//! Moves never fail the caller. A file that cannot be archived stays in the
//! intake directory and is delivered again after the next full rescan.

use sluice_core::emit;
use sluice_core::metrics::events::{ArchiveFailed, FileArchived, FileQuarantined};
use sluice_core::storage::BackendRef;
use tracing::{info, warn};

/// Relocates intake files to the ready or quarantine directory.
#[derive(Debug, Clone)]
pub struct Archiver {
    backend: BackendRef,
    input_dir: String,
    ready_dir: String,
    quarantine_dir: Option<String>,
    target: String,
}

impl Archiver {
    pub fn new(
        backend: BackendRef,
        input_dir: impl Into<String>,
        ready_dir: impl Into<String>,
        quarantine_dir: Option<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            input_dir: input_dir.into(),
            ready_dir: ready_dir.into(),
            quarantine_dir,
            target: target.into(),
        }
    }

    /// Move a fully consumed file to the ready directory.
    ///
    /// Returns whether the move succeeded.
    pub async fn archive(&self, name: &str) -> bool {
        match self.backend.rename(&self.input_dir, &self.ready_dir, name).await {
            Ok(()) => {
                info!(target = %self.target, file = name, ready_dir = %self.ready_dir, "Archived file");
                emit!(FileArchived {
                    target: self.target.clone(),
                });
                true
            }
            Err(e) => {
                warn!(
                    target = %self.target,
                    file = name,
                    error = %e,
                    "Failed to archive file, it will be delivered again on the next scan"
                );
                emit!(ArchiveFailed {
                    target: self.target.clone(),
                });
                false
            }
        }
    }

    /// Move a file that keeps failing to open into quarantine.
    ///
    /// Returns false when no quarantine directory is configured or the move failed.
    pub async fn quarantine(&self, name: &str) -> bool {
        let Some(quarantine_dir) = &self.quarantine_dir else {
            return false;
        };

        match self.backend.rename(&self.input_dir, quarantine_dir, name).await {
            Ok(()) => {
                warn!(target = %self.target, file = name, %quarantine_dir, "Quarantined unreadable file");
                emit!(FileQuarantined {
                    target: self.target.clone(),
                });
                true
            }
            Err(e) => {
                warn!(target = %self.target, file = name, error = %e, "Failed to quarantine file");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::storage::MemoryBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_archive_moves_file() {
        sluice_core::metrics::init_test();
        let backend = MemoryBackend::new();
        backend.put("in", "a.gz", "x");
        let archiver = Archiver::new(Arc::new(backend.clone()), "in", "ready", None, "test");

        assert!(archiver.archive("a.gz").await);
        assert_eq!(backend.entries("ready"), vec!["a.gz"]);
    }

    #[tokio::test]
    async fn test_archive_failure_leaves_file_in_place() {
        sluice_core::metrics::init_test();
        let backend = MemoryBackend::new();
        backend.put("in", "a.gz", "x");
        backend.fail_renames_of("a.gz");
        let archiver = Archiver::new(Arc::new(backend.clone()), "in", "ready", None, "test");

        assert!(!archiver.archive("a.gz").await);
        assert_eq!(backend.entries("in"), vec!["a.gz"]);
    }

    #[tokio::test]
    async fn test_quarantine_requires_directory() {
        sluice_core::metrics::init_test();
        let backend = MemoryBackend::new();
        backend.put("in", "bad.gz", "x");

        let without = Archiver::new(Arc::new(backend.clone()), "in", "ready", None, "test");
        assert!(!without.quarantine("bad.gz").await);

        let with = Archiver::new(
            Arc::new(backend.clone()),
            "in",
            "ready",
            Some("quarantine".to_string()),
            "test",
        );
        assert!(with.quarantine("bad.gz").await);
        assert_eq!(backend.entries("quarantine"), vec!["bad.gz"]);
    }
}
