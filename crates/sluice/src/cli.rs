//! Command line arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Config, KafkaConfig, StartOffset};
use crate::error::ConfigError;
use crate::pipeline::OffsetSchedule;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll the intake directory and publish every row
    Ingest {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Validate the configuration, log the resolved settings and exit
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a topic partition back out as CSV on stdout
    Replay {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Stop after this many records (0 = no limit), overriding `replay.count`
        #[arg(long)]
        count: Option<u64>,

        /// Where to start reading, overriding `replay.start`
        #[arg(long, value_enum)]
        start: Option<StartOffset>,
    },

    /// Print topic:partition:offset for every partition of a topic
    Offsets {
        /// Path to configuration file; only the `kafka` section is used
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Comma-separated broker list, overriding `kafka.brokers`
        #[arg(long, value_delimiter = ',')]
        broker_list: Vec<String>,

        /// Topic, overriding `kafka.topic`
        #[arg(long)]
        topic: Option<String>,

        /// Print the earliest or latest offset
        #[arg(long, value_enum, default_value_t = StartOffset::Latest)]
        at: StartOffset,

        /// Seconds between rounds
        #[arg(long, default_value_t = 10)]
        interval: u64,

        /// Number of rounds; negative repeats until interrupted. Zero prints a
        /// single round, and N prints exactly N rounds (not N + 1)
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        count: i64,
    },
}

impl Command {
    /// Resolve the broker settings for `offsets`: flags, then file, then defaults.
    pub fn offsets_kafka(
        config: Option<&Config>,
        broker_list: &[String],
        topic: Option<&str>,
    ) -> Result<KafkaConfig, ConfigError> {
        let mut kafka = config.map(|c| c.kafka.clone()).unwrap_or_default();
        if !broker_list.is_empty() {
            kafka.brokers = broker_list.to_vec();
        }
        if let Some(topic) = topic {
            kafka.topic = topic.to_string();
        }
        kafka.validate()?;
        Ok(kafka)
    }

    pub fn offsets_schedule(at: StartOffset, interval: u64, count: i64) -> OffsetSchedule {
        OffsetSchedule {
            at,
            interval: std::time::Duration::from_secs(interval),
            count,
        }
    }
}
