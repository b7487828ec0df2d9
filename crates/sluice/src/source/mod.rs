//! Turning an intake directory into a stream of rows.
//!
//! - `decoder`: gzip'd CSV to rows
//! - `ledger`: what is pending and what has been consumed
//! - `archive`: moving consumed and unreadable files away
//! - `record_source`: the polling state machine tying them together

mod archive;
mod decoder;
mod ledger;
mod record_source;

pub use archive::Archiver;
pub use decoder::{DecodeStats, Row, RowDecoder};
pub use ledger::{DirectoryLedger, IntakeEntry, IntakeLedger, ListingOrder};
pub use record_source::{RecordSource, SourceSettings};

use sluice_core::storage::BackendRef;

use crate::config::SourceConfig;
use crate::error::ConfigError;

/// Build a directory-backed record source for `config` on `backend`.
pub fn from_config(config: &SourceConfig, backend: BackendRef) -> Result<RecordSource<DirectoryLedger>, ConfigError> {
    let target = config.target();
    let archiver = Archiver::new(
        backend.clone(),
        &config.input_dir,
        &config.ready_dir,
        config.quarantine_dir.clone(),
        &target,
    );
    let ledger = DirectoryLedger::new(backend, &config.input_dir, config.order, archiver);

    Ok(RecordSource::new(
        ledger,
        SourceSettings {
            wait_interval: config.wait_interval(),
            delimiter: config.delimiter_byte()?,
            max_open_failures: config.max_open_failures,
            target,
        },
    ))
}
