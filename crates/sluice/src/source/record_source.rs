//! The record source state machine.
//!
//! ```text
//! Scanning --empty--> Waiting --interval--> Scanning
//! Scanning --entries--> Opening --opened--> Reading --eof/malformed--> Archiving
//! Archiving --more entries--> Opening
//! Archiving --listing done--> Scanning
//! Opening --nothing opened this pass--> Waiting
//! ```
//!
//! A listing is consumed front to back before the directory is scanned again.
//! Entries that fail to open are skipped for the rest of the pass. A file is
//! handed to the ledger only after its decoder has reported end of stream.

use std::collections::HashMap;
use std::mem;
use std::time::Duration;

use snafu::prelude::*;
use sluice_core::StorageError;
use sluice_core::emit;
use sluice_core::metrics::events::{FileFinished, FileOpenFailed, FileOpened, FileStatus, OpenStage, RowsRead, ScanCompleted};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::decoder::{Row, RowDecoder};
use super::ledger::{IntakeEntry, IntakeLedger};
use crate::error::{DecodeError, ListSnafu, SourceError};

/// Tunables for a [`RecordSource`].
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Sleep between scans of an empty (or wholly unopenable) directory.
    pub wait_interval: Duration,
    pub delimiter: u8,
    /// Consecutive failed passes before an entry is quarantined.
    pub max_open_failures: u32,
    /// Pipeline label for logs and metrics.
    pub target: String,
}

/// The open file currently being read.
struct Session {
    entry: IntakeEntry,
    decoder: RowDecoder,
    opened_at: Instant,
}

enum State {
    Scanning,
    Waiting,
    Opening,
    Reading(Session),
    Archiving(IntakeEntry),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Scanning => "scanning",
            State::Waiting => "waiting",
            State::Opening => "opening",
            State::Reading(_) => "reading",
            State::Archiving(_) => "archiving",
        }
    }
}

enum OpenFailure {
    Read(StorageError),
    Decompress(DecodeError),
}

/// Turns an intake ledger into one ordered stream of rows.
///
/// Driven by a single caller through [`RecordSource::next_row`]. The call is
/// cancel-safe: a call dropped while waiting or fetching resumes from a
/// consistent state, at worst with a fresh scan.
pub struct RecordSource<L> {
    ledger: L,
    settings: SourceSettings,
    state: State,
    listing: Vec<IntakeEntry>,
    cursor: usize,
    opened_in_pass: bool,
    open_failures: HashMap<String, u32>,
    files_finished: u64,
}

impl<L: IntakeLedger> RecordSource<L> {
    pub fn new(ledger: L, settings: SourceSettings) -> Self {
        Self {
            ledger,
            settings,
            state: State::Scanning,
            listing: Vec::new(),
            cursor: 0,
            opened_in_pass: false,
            open_failures: HashMap::new(),
            files_finished: 0,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// Files read to the end (cleanly or not) since creation.
    pub fn files_finished(&self) -> u64 {
        self.files_finished
    }

    /// Name of the current state, for diagnostics.
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// The next row across all pending files.
    ///
    /// Blocks for as long as the intake directory stays empty. Only a failed
    /// directory listing is returned as an error; problems with individual
    /// files are logged and skipped.
    pub async fn next_row(&mut self) -> Result<Row, SourceError> {
        loop {
            match mem::replace(&mut self.state, State::Scanning) {
                State::Scanning => self.scan().await?,
                State::Waiting => {
                    self.state = State::Waiting;
                    tokio::time::sleep(self.settings.wait_interval).await;
                    self.state = State::Scanning;
                }
                State::Opening => self.state = self.open_next().await,
                State::Reading(mut session) => match session.decoder.next_row() {
                    Ok(Some(row)) => {
                        trace!(target = %self.settings.target, file = %session.entry.name, "Row read");
                        self.state = State::Reading(session);
                        return Ok(row);
                    }
                    Ok(None) => self.state = self.finish(session, FileStatus::Complete),
                    Err(e) => {
                        warn!(
                            target = %self.settings.target,
                            file = %session.entry.name,
                            error = %e,
                            "Stopped reading malformed file, remaining rows are lost"
                        );
                        self.state = self.finish(session, FileStatus::Malformed);
                    }
                },
                State::Archiving(entry) => {
                    self.ledger.consume(&entry).await;
                    self.cursor += 1;
                    self.state = if self.cursor < self.listing.len() {
                        State::Opening
                    } else {
                        State::Scanning
                    };
                }
            }
        }
    }

    async fn scan(&mut self) -> Result<(), SourceError> {
        let listing = self.ledger.scan().await.context(ListSnafu {
            location: self.ledger.location(),
        })?;

        self.open_failures
            .retain(|name, _| listing.iter().any(|entry| &entry.name == name));

        emit!(ScanCompleted {
            entries: listing.len() as u64,
            target: self.settings.target.clone(),
        });

        if listing.is_empty() {
            debug!(target = %self.settings.target, "Intake directory empty");
            self.state = State::Waiting;
        } else {
            info!(target = %self.settings.target, files = listing.len(), "Scanned intake directory");
            self.state = State::Opening;
        }

        self.listing = listing;
        self.cursor = 0;
        self.opened_in_pass = false;
        Ok(())
    }

    /// Open the first openable entry at or after the cursor.
    async fn open_next(&mut self) -> State {
        while let Some(entry) = self.listing.get(self.cursor).cloned() {
            match self.open_entry(&entry).await {
                Ok((decoder, bytes)) => {
                    self.open_failures.remove(&entry.name);
                    self.opened_in_pass = true;
                    info!(target = %self.settings.target, file = %entry.name, bytes, "Opened file");
                    emit!(FileOpened {
                        bytes,
                        target: self.settings.target.clone(),
                    });
                    return State::Reading(Session {
                        entry,
                        decoder,
                        opened_at: Instant::now(),
                    });
                }
                Err(failure) => {
                    self.record_open_failure(&entry, failure).await;
                    self.cursor += 1;
                }
            }
        }

        if self.opened_in_pass {
            State::Scanning
        } else {
            State::Waiting
        }
    }

    async fn open_entry(&self, entry: &IntakeEntry) -> Result<(RowDecoder, u64), OpenFailure> {
        let data = self.ledger.open(entry).await.map_err(OpenFailure::Read)?;
        let bytes = data.len() as u64;
        let decoder = RowDecoder::open(data, self.settings.delimiter).map_err(OpenFailure::Decompress)?;
        Ok((decoder, bytes))
    }

    async fn record_open_failure(&mut self, entry: &IntakeEntry, failure: OpenFailure) {
        let target = &self.settings.target;
        let (stage, error) = match failure {
            OpenFailure::Read(e) if e.is_not_found() => {
                debug!(target = %target, file = %entry.name, "File vanished before it could be opened");
                self.open_failures.remove(&entry.name);
                return;
            }
            OpenFailure::Read(e) => (OpenStage::Open, e.to_string()),
            OpenFailure::Decompress(e) => (OpenStage::Decompress, e.to_string()),
        };

        let failures = self.open_failures.entry(entry.name.clone()).or_default();
        *failures += 1;
        let failures = *failures;

        warn!(
            target = %target,
            file = %entry.name,
            stage = stage.as_str(),
            failures,
            %error,
            "Skipping file that could not be opened"
        );
        emit!(FileOpenFailed {
            stage,
            target: target.clone(),
        });

        if failures >= self.settings.max_open_failures && self.ledger.quarantine(entry).await {
            self.open_failures.remove(&entry.name);
        }
    }

    fn finish(&mut self, session: Session, status: FileStatus) -> State {
        let Session {
            entry,
            decoder,
            opened_at,
        } = session;
        let stats = decoder.close();
        let target = self.settings.target.clone();
        self.files_finished += 1;

        info!(
            target = %target,
            file = %entry.name,
            rows = stats.rows,
            status = status.as_str(),
            "Finished file"
        );
        if stats.lossy_rows > 0 {
            warn!(
                target = %target,
                file = %entry.name,
                lossy_rows = stats.lossy_rows,
                "File contained fields that were not valid UTF-8; invalid bytes were replaced"
            );
        }
        emit!(FileFinished {
            status,
            duration: opened_at.elapsed(),
            target: target.clone(),
        });
        emit!(RowsRead {
            count: stats.rows,
            target,
        });

        State::Archiving(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::archive::Archiver;
    use crate::source::decoder::tests::gzip;
    use crate::source::ledger::{DirectoryLedger, ListingOrder};
    use bytes::Bytes;
    use sluice_core::storage::{BackendRef, MemoryBackend};
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_secs(10);

    fn source(backend: &MemoryBackend, quarantine: Option<&str>, max_open_failures: u32) -> RecordSource<DirectoryLedger> {
        sluice_core::metrics::init_test();
        let backend: BackendRef = Arc::new(backend.clone());
        let archiver = Archiver::new(
            backend.clone(),
            "in",
            "ready",
            quarantine.map(str::to_string),
            "test",
        );
        let ledger = DirectoryLedger::new(backend, "in", ListingOrder::Native, archiver);
        RecordSource::new(
            ledger,
            SourceSettings {
                wait_interval: WAIT,
                delimiter: b',',
                max_open_failures,
                target: "test".to_string(),
            },
        )
    }

    async fn next(source: &mut RecordSource<DirectoryLedger>) -> Vec<String> {
        source.next_row().await.unwrap().into_fields()
    }

    /// Pull once more and expect the source to end up waiting on an empty directory.
    async fn expect_idle(source: &mut RecordSource<DirectoryLedger>) {
        let pending = tokio::time::timeout(Duration::from_secs(1), source.next_row()).await;
        assert!(pending.is_err(), "source should be waiting for new files");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rows_span_files_in_listing_order() {
        let backend = MemoryBackend::new();
        backend.put("in", "b.gz", gzip("b1,x\nb2,y\n"));
        backend.put("in", "a.gz", gzip("a1,z\n"));
        let mut source = source(&backend, None, 3);

        assert_eq!(next(&mut source).await, vec!["b1", "x"]);
        assert_eq!(next(&mut source).await, vec!["b2", "y"]);
        // b.gz is not archived until its end of stream has been seen.
        assert_eq!(backend.entries("ready"), Vec::<String>::new());

        assert_eq!(next(&mut source).await, vec!["a1", "z"]);
        assert_eq!(backend.entries("ready"), vec!["b.gz"]);

        expect_idle(&mut source).await;
        assert_eq!(backend.entries("ready"), vec!["b.gz", "a.gz"]);
        assert!(backend.entries("in").is_empty());
        assert_eq!(source.files_finished(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unopenable_front_entry_does_not_block_pass() {
        let backend = MemoryBackend::new();
        backend.put("in", "plain.csv", Bytes::from_static(b"not,gzip\n"));
        backend.put("in", "gone.gz", gzip("x\n"));
        backend.fail_opens_of("gone.gz");
        backend.put("in", "good.gz", gzip("ok\n"));
        let mut source = source(&backend, None, 3);

        assert_eq!(next(&mut source).await, vec!["ok"]);
        assert_eq!(backend.list_calls(), 1);

        expect_idle(&mut source).await;
        assert_eq!(backend.entries("ready"), vec!["good.gz"]);
        assert_eq!(backend.entries("in"), vec!["plain.csv", "gone.gz"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_archive_failure_redelivers_file() {
        let backend = MemoryBackend::new();
        backend.put("in", "a.gz", gzip("r1\n"));
        backend.fail_renames_of("a.gz");
        let mut source = source(&backend, None, 3);

        assert_eq!(next(&mut source).await, vec!["r1"]);
        // Archiving fails, the rescan picks the file up again from the start.
        assert_eq!(next(&mut source).await, vec!["r1"]);
        assert_eq!(backend.list_calls(), 2);

        backend.clear_rename_failures();
        expect_idle(&mut source).await;
        assert_eq!(backend.entries("ready"), vec!["a.gz"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_directory_waits_between_scans() {
        let backend = MemoryBackend::new();
        backend.schedule(2, "in", "late.gz", gzip("late\n"));
        let mut source = source(&backend, None, 3);

        let start = Instant::now();
        assert_eq!(next(&mut source).await, vec!["late"]);

        let elapsed = start.elapsed();
        assert_eq!(backend.list_calls(), 3);
        assert!(elapsed >= WAIT * 2, "elapsed {elapsed:?}");
        assert!(elapsed < WAIT * 2 + Duration::from_secs(1), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_error_is_returned_then_recovers() {
        let backend = MemoryBackend::new();
        backend.put("in", "a.gz", gzip("r1\n"));
        backend.fail_next_lists(1);
        let mut source = source(&backend, None, 3);

        let err = source.next_row().await.unwrap_err();
        assert!(matches!(err, SourceError::List { .. }));
        assert!(err.to_string().contains("memory://in"));
        assert_eq!(source.state_name(), "scanning");

        assert_eq!(next(&mut source).await, vec!["r1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_file_is_archived() {
        let text: String = (0..2000).map(|i| format!("{i},{}\n", i * 3)).collect();
        let full = gzip(&text);
        let backend = MemoryBackend::new();
        backend.put("in", "broken.gz", full.slice(..full.len() / 2));
        backend.put("in", "next.gz", gzip("after\n"));
        let mut source = source(&backend, None, 3);

        let mut delivered = 0;
        let first_of_next = loop {
            let row = next(&mut source).await;
            if row == vec!["after"] {
                break row;
            }
            delivered += 1;
        };

        assert!(delivered < 2000);
        assert_eq!(first_of_next, vec!["after"]);
        assert_eq!(backend.entries("ready"), vec!["broken.gz"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistently_unopenable_file_is_quarantined() {
        let backend = MemoryBackend::new();
        backend.put("in", "bad.gz", Bytes::from_static(b"garbage"));
        backend.schedule(2, "in", "good.gz", gzip("ok\n"));
        let mut source = source(&backend, Some("quarantine"), 2);

        assert_eq!(next(&mut source).await, vec!["ok"]);

        assert_eq!(backend.entries("quarantine"), vec!["bad.gz"]);
        assert_eq!(backend.open_calls("bad.gz"), 2);

        expect_idle(&mut source).await;
        assert_eq!(backend.open_calls("bad.gz"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unopenable_file_kept_without_quarantine() {
        let backend = MemoryBackend::new();
        backend.put("in", "bad.gz", Bytes::from_static(b"garbage"));
        let mut source = source(&backend, None, 1);

        let pending = tokio::time::timeout(WAIT * 3 + Duration::from_secs(1), source.next_row()).await;
        assert!(pending.is_err());

        assert_eq!(backend.entries("in"), vec!["bad.gz"]);
        assert_eq!(backend.open_calls("bad.gz"), 4);
    }
}
