//! The three commands, wired from configuration to running loops.

mod ingest;
mod offsets;
mod replay;

pub use ingest::{IngestPipeline, IngestStats};
pub use offsets::{OffsetLookup, OffsetSchedule, print_offsets};
pub use replay::{KafkaFetcher, RecordFetcher, replay};

use snafu::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, KafkaConfig};
use crate::error::{AddressParseSnafu, PipelineError};
use crate::mapping::RowMapper;
use crate::publish::{KafkaPublisher, connect};
use crate::source;

/// Start the Prometheus endpoint when the configuration asks for it.
pub fn start_metrics(config: &Config) -> Result<(), PipelineError> {
    if !config.metrics.enabled {
        return Ok(());
    }
    let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
    sluice_core::init_metrics(addr)?;
    Ok(())
}

/// Read the intake directory into Kafka until `shutdown`.
pub async fn run_ingest(config: &Config, shutdown: CancellationToken) -> Result<IngestStats, PipelineError> {
    let source_config = config.source()?;
    let backend = source_config.backend.build();
    let source = source::from_config(source_config, backend)?;
    let mapper = RowMapper::new(config.schema.clone())?;

    start_metrics(config)?;
    let publisher = KafkaPublisher::connect(&config.kafka).await?;

    Ok(IngestPipeline::new(source, mapper, publisher).run(shutdown).await)
}

/// Log what `ingest` would run with, without touching storage or brokers.
pub fn describe_ingest(config: &Config) -> Result<(), PipelineError> {
    let source = config.source()?;
    let mapper = RowMapper::new(config.schema.clone())?;
    info!(
        target = %source.target(),
        backend = %source.backend.build().describe(),
        input_dir = %source.input_dir,
        ready_dir = %source.ready_dir,
        quarantine_dir = ?source.quarantine_dir,
        wait_interval_secs = source.wait_interval_secs,
        order = ?source.order,
        brokers = ?config.kafka.brokers,
        topic = %config.kafka.topic,
        partition = config.kafka.partition,
        fields = config.schema.fields.len(),
        "Configuration is valid"
    );
    tracing::debug!(schema = %mapper.schema().canonical_form(), "Resolved Avro schema");
    Ok(())
}

/// Copy the configured topic partition to stdout as CSV.
pub async fn run_replay(config: &Config, shutdown: CancellationToken) -> Result<u64, PipelineError> {
    let mapper = RowMapper::new(config.schema.clone())?;
    let mut fetcher = KafkaFetcher::connect(&config.kafka, config.replay.start).await?;

    let written = replay(&mut fetcher, &mapper, &config.replay, std::io::stdout(), shutdown).await?;
    info!(topic = %config.kafka.topic, written, "Replay finished");
    Ok(written)
}

/// Print partition offsets of `kafka.topic` to stdout.
pub async fn run_offsets(
    kafka: &KafkaConfig,
    schedule: OffsetSchedule,
    shutdown: CancellationToken,
) -> Result<(), PipelineError> {
    let client = connect(&kafka.brokers).await?;
    print_offsets(&client, &kafka.topic, schedule, std::io::stdout(), shutdown).await
}
