//! Configuration loading shared by the sluice commands.

mod vars;

pub use vars::interpolate;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;

use crate::error::{ConfigError, ReadFileSnafu, YamlParseSnafu};

/// Read a YAML file, expand environment variables and deserialize it.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    parse_yaml(&contents)
}

/// Expand environment variables in `contents` and deserialize the result.
pub fn parse_yaml<T: DeserializeOwned>(contents: &str) -> Result<T, ConfigError> {
    let expanded = interpolate(contents)?;
    serde_yaml::from_str(&expanded).context(YamlParseSnafu)
}

/// Prometheus endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Serve `/metrics` and `/health` (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Bind address (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_metrics_defaults() {
        let config: MetricsConfig = parse_yaml("{}").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.address, "0.0.0.0:9090");
    }

    #[test]
    fn test_metrics_rejects_unknown_fields() {
        let result: Result<MetricsConfig, _> = parse_yaml("enabled: true\nport: 9000\n");
        assert!(matches!(result, Err(ConfigError::YamlParse { .. })));
    }

    #[test]
    fn test_read_yaml_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "enabled: true\naddress: \"127.0.0.1:9100\"").unwrap();

        let config: MetricsConfig = read_yaml(file.path()).unwrap();
        assert!(config.enabled);
        assert_eq!(config.address, "127.0.0.1:9100");
    }

    #[test]
    fn test_read_yaml_missing_file() {
        let result: Result<MetricsConfig, _> = read_yaml(Path::new("/nonexistent/sluice.yml"));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
