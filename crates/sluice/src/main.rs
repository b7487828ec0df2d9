//! sluice CLI: gzip'd CSV drops into Kafka, and back out again.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use sluice::pipeline::{self, IngestStats};
use sluice::{Cli, Command, Config, PipelineError, init_tracing, shutdown_token};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "sluice failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), PipelineError> {
    match command {
        Command::Ingest { config, dry_run } => {
            info!("Loading config from {}", config.display());
            let config = Config::from_file(&config)?;
            if dry_run {
                return pipeline::describe_ingest(&config);
            }
            let IngestStats { files_finished, .. } = pipeline::run_ingest(&config, shutdown_token()).await?;
            info!(files_finished, "Shutdown complete");
            Ok(())
        }
        Command::Replay { config, count, start } => {
            let mut config = Config::from_file(&config)?;
            if let Some(count) = count {
                config.replay.count = count;
            }
            if let Some(start) = start {
                config.replay.start = start;
            }
            pipeline::start_metrics(&config)?;
            pipeline::run_replay(&config, shutdown_token()).await?;
            Ok(())
        }
        Command::Offsets {
            config,
            broker_list,
            topic,
            at,
            interval,
            count,
        } => {
            let config = config.as_deref().map(Config::from_file).transpose()?;
            let kafka = Command::offsets_kafka(config.as_ref(), &broker_list, topic.as_deref())?;
            let schedule = Command::offsets_schedule(at, interval, count);
            pipeline::run_offsets(&kafka, schedule, shutdown_token()).await
        }
    }
}
