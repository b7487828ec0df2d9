//! Configuration for the sluice commands.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub use sluice_core::config::MetricsConfig;
pub use sluice_core::storage::{BackendConfig, SftpConfig};

use crate::error::ConfigError;
use crate::mapping::SchemaConfig;
use crate::source::ListingOrder;

/// Top-level configuration file.
///
/// Each command reads the sections it needs: `ingest` requires `source`,
/// `replay` and `offsets` only need `kafka`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub source: Option<SourceConfig>,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load, interpolate and validate a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = sluice_core::read_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse, interpolate and validate YAML text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = sluice_core::parse_yaml(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(source) = &self.source {
            source.validate()?;
        }
        self.kafka.validate()?;
        self.schema.validate()
    }

    /// The `source` section, which only `ingest` requires.
    pub fn source(&self) -> Result<&SourceConfig, ConfigError> {
        self.source.as_ref().ok_or_else(|| ConfigError::MissingSection {
            section: "source".to_string(),
        })
    }
}

/// Where files arrive, where they go afterwards, and how they are read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default)]
    pub input_dir: String,
    #[serde(default)]
    pub ready_dir: String,
    /// Destination for files that repeatedly fail to open. Without it they are
    /// skipped on every pass.
    #[serde(default)]
    pub quarantine_dir: Option<String>,
    #[serde(default = "default_wait_interval_secs")]
    pub wait_interval_secs: u64,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default)]
    pub order: ListingOrder,
    #[serde(default = "default_max_open_failures")]
    pub max_open_failures: u32,
    #[serde(default)]
    pub backend: BackendConfig,
    /// Label for logs and metrics (default: the input directory).
    #[serde(default)]
    pub target: Option<String>,
}

fn default_wait_interval_secs() -> u64 {
    10
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_max_open_failures() -> u32 {
    3
}

impl SourceConfig {
    pub fn new(input_dir: impl Into<String>, ready_dir: impl Into<String>) -> Self {
        Self {
            input_dir: input_dir.into(),
            ready_dir: ready_dir.into(),
            quarantine_dir: None,
            wait_interval_secs: default_wait_interval_secs(),
            delimiter: default_delimiter(),
            order: ListingOrder::default(),
            max_open_failures: default_max_open_failures(),
            backend: BackendConfig::default(),
            target: None,
        }
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_secs(self.wait_interval_secs)
    }

    pub fn target(&self) -> String {
        self.target.clone().unwrap_or_else(|| self.input_dir.clone())
    }

    pub fn delimiter_byte(&self) -> Result<u8, ConfigError> {
        match self.delimiter.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(ConfigError::InvalidDelimiter {
                value: self.delimiter.clone(),
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("input_dir", &self.input_dir), ("ready_dir", &self.ready_dir)] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyDirectory {
                    field: field.to_string(),
                });
            }
        }
        if same_dir(&self.input_dir, &self.ready_dir) {
            return Err(ConfigError::SameDirectory {
                first: "input_dir".to_string(),
                second: "ready_dir".to_string(),
            });
        }
        if let Some(quarantine_dir) = &self.quarantine_dir {
            if quarantine_dir.trim().is_empty() {
                return Err(ConfigError::EmptyDirectory {
                    field: "quarantine_dir".to_string(),
                });
            }
            if same_dir(&self.input_dir, quarantine_dir) {
                return Err(ConfigError::SameDirectory {
                    first: "input_dir".to_string(),
                    second: "quarantine_dir".to_string(),
                });
            }
        }
        self.delimiter_byte()?;
        if self.max_open_failures == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_open_failures".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if let BackendConfig::Sftp(sftp) = &self.backend {
            for (field, value) in [("host", &sftp.host), ("user", &sftp.user)] {
                if value.trim().is_empty() {
                    return Err(ConfigError::MissingSftpSetting {
                        field: field.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn same_dir(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Broker connection and destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KafkaConfig {
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub partition: i32,
}

fn default_brokers() -> Vec<String> {
    vec!["127.0.0.1:9092".to_string()]
}

fn default_topic() -> String {
    "hits".to_string()
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topic: default_topic(),
            partition: 0,
        }
    }
}

impl KafkaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(ConfigError::Kafka {
                message: "broker list is empty".to_string(),
            });
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Kafka {
                message: "topic is empty".to_string(),
            });
        }
        if self.partition < 0 {
            return Err(ConfigError::OutOfRange {
                field: "kafka.partition".to_string(),
                message: "must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

/// Which end of the partition to start from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    #[default]
    Earliest,
    Latest,
}

/// Settings for `sluice replay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayConfig {
    /// Stop after this many records (0 = no limit).
    #[serde(default)]
    pub count: u64,
    /// Stop when no record arrives within this many seconds.
    #[serde(default = "default_max_poll_timeout_secs")]
    pub max_poll_timeout_secs: u64,
    #[serde(default)]
    pub start: StartOffset,
}

fn default_max_poll_timeout_secs() -> u64 {
    20
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            count: 0,
            max_poll_timeout_secs: default_max_poll_timeout_secs(),
            start: StartOffset::default(),
        }
    }
}

impl ReplayConfig {
    pub fn max_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.max_poll_timeout_secs)
    }
}
