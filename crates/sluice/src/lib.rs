//! sluice: streams gzip'd CSV drops from an intake directory into Kafka.
//!
//! This crate handles:
//! - Polling a local or SFTP intake directory and reading each file's rows in order
//! - Moving fully read files to a ready directory, and unopenable ones to quarantine
//! - Mapping rows to Avro records and publishing them to a topic partition
//! - Replaying a topic back to CSV and printing partition offsets

pub mod cli;
pub mod config;
pub mod error;
pub mod mapping;
pub mod pipeline;
pub mod publish;
pub mod source;

pub use cli::{Cli, Command};
pub use config::Config;
pub use error::PipelineError;
pub use pipeline::{IngestPipeline, IngestStats};
pub use source::{RecordSource, Row};

pub use sluice_core::{init_tracing, shutdown_token};
