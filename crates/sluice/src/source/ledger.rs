//! What remains to be processed.
//!
//! The intake directory is its own ledger: a file is pending while it sits in
//! the directory and consumed once it has been moved out. `IntakeLedger` keeps
//! that policy out of the record source so another notion of progress can be
//! substituted.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sluice_core::storage::BackendRef;
use sluice_core::StorageError;

use super::archive::Archiver;

/// A pending file, as seen by one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeEntry {
    pub name: String,
    pub size: u64,
}

/// Order in which a scan presents entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingOrder {
    /// Whatever the backend returns.
    #[default]
    Native,
    /// Sorted by file name.
    Lexical,
}

#[async_trait]
pub trait IntakeLedger: Send + Sync {
    /// Entries still waiting to be processed.
    async fn scan(&self) -> Result<Vec<IntakeEntry>, StorageError>;

    /// Raw contents of an entry.
    async fn open(&self, entry: &IntakeEntry) -> Result<Bytes, StorageError>;

    /// Record that every row of `entry` has been delivered. Never fails.
    async fn consume(&self, entry: &IntakeEntry);

    /// Set aside an entry that keeps failing to open. Returns whether it was removed.
    async fn quarantine(&self, entry: &IntakeEntry) -> bool;

    /// Where entries come from, for logs and errors.
    fn location(&self) -> String;
}

/// Ledger backed by the intake directory itself.
#[derive(Debug, Clone)]
pub struct DirectoryLedger {
    backend: BackendRef,
    input_dir: String,
    order: ListingOrder,
    archiver: Archiver,
}

impl DirectoryLedger {
    pub fn new(backend: BackendRef, input_dir: impl Into<String>, order: ListingOrder, archiver: Archiver) -> Self {
        Self {
            backend,
            input_dir: input_dir.into(),
            order,
            archiver,
        }
    }
}

#[async_trait]
impl IntakeLedger for DirectoryLedger {
    async fn scan(&self) -> Result<Vec<IntakeEntry>, StorageError> {
        let mut entries: Vec<IntakeEntry> = self
            .backend
            .list(&self.input_dir)
            .await?
            .into_iter()
            .map(|e| IntakeEntry {
                name: e.name,
                size: e.size,
            })
            .collect();

        if self.order == ListingOrder::Lexical {
            entries.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Ok(entries)
    }

    async fn open(&self, entry: &IntakeEntry) -> Result<Bytes, StorageError> {
        self.backend.open(&self.input_dir, &entry.name).await
    }

    async fn consume(&self, entry: &IntakeEntry) {
        self.archiver.archive(&entry.name).await;
    }

    async fn quarantine(&self, entry: &IntakeEntry) -> bool {
        self.archiver.quarantine(&entry.name).await
    }

    fn location(&self) -> String {
        format!("{}{}", self.backend.describe(), self.input_dir)
    }
}
