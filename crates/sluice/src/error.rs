//! Error types for the sluice commands.

use snafu::prelude::*;

pub use sluice_core::error::{ConfigError, MetricsError, StorageError};

/// Errors from the decompressing row decoder.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DecodeError {
    /// Input does not start with a gzip header.
    #[snafu(display("Input is not gzip-compressed"))]
    NotCompressed,

    /// Decompression or CSV parsing failed partway through the stream.
    #[snafu(display("Malformed data after row {row}: {source}"))]
    Malformed { row: u64, source: csv::Error },
}

/// Errors surfaced by the record source to its caller.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// Listing the intake directory failed.
    #[snafu(display("Failed to list {location}: {source}"))]
    List {
        location: String,
        source: StorageError,
    },
}

/// Errors from building or applying the Avro schema.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MappingError {
    /// The generated Avro schema was rejected.
    #[snafu(display("Invalid Avro schema: {source}"))]
    Schema { source: apache_avro::Error },

    /// A mapped row could not be serialized.
    #[snafu(display("Failed to encode row: {source}"))]
    Encode { source: apache_avro::Error },

    /// A payload could not be deserialized.
    #[snafu(display("Failed to decode payload: {source}"))]
    Decode { source: apache_avro::Error },

    /// A payload is not exactly one canonically encoded datum.
    #[snafu(display("Corrupt payload: {message}"))]
    Corrupt { message: String },

    /// A decoded payload does not have the schema's shape.
    #[snafu(display("Unexpected value for field '{field}': {message}"))]
    UnexpectedValue { field: String, message: String },
}

/// Errors from the broker client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PublishError {
    /// Bootstrapping the client against the broker list failed.
    #[snafu(display("Failed to connect to brokers {brokers}: {source}"))]
    Connect {
        brokers: String,
        source: rskafka::client::error::Error,
    },

    /// A request to the partition leader failed.
    #[snafu(display("Kafka request for {topic}/{partition} failed: {source}"))]
    Kafka {
        topic: String,
        partition: i32,
        source: rskafka::client::error::Error,
    },

    /// Topic metadata did not contain the requested topic.
    #[snafu(display("Topic '{topic}' not found"))]
    UnknownTopic { topic: String },

    /// The publisher refused the payload.
    #[snafu(display("Payload rejected: {message}"))]
    Rejected { message: String },
}

/// Top-level command errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Mapping error.
    #[snafu(display("Mapping error: {source}"))]
    Mapping { source: MappingError },

    /// Broker error.
    #[snafu(display("Publish error: {source}"))]
    Publish { source: PublishError },

    /// Writing replayed rows failed.
    #[snafu(display("Failed to write output: {source}"))]
    Output { source: csv::Error },

    /// Failed to parse metrics address.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<MappingError> for PipelineError {
    fn from(source: MappingError) -> Self {
        PipelineError::Mapping { source }
    }
}

impl From<PublishError> for PipelineError {
    fn from(source: PublishError) -> Self {
        PipelineError::Publish { source }
    }
}

impl From<MetricsError> for PipelineError {
    fn from(source: MetricsError) -> Self {
        PipelineError::Metrics { source }
    }
}
