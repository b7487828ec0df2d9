//! Common error types for storage, configuration and metrics.
//!
//! Storage errors are deliberately coarse: the record source only needs to know
//! whether an operation failed and, for opens, whether the entry vanished.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors raised by a [`StorageBackend`](crate::storage::StorageBackend).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// A directory could not be mapped onto the backend's path scheme.
    #[snafu(display("Invalid path {path}: {source}"))]
    InvalidPath {
        path: String,
        source: object_store::path::Error,
    },

    /// Object store operation failed.
    #[snafu(display("Storage operation on {path} failed: {source}"))]
    ObjectStore {
        path: String,
        source: object_store::Error,
    },

    /// IO error during storage operations.
    #[snafu(display("IO error on {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// TCP connection to the SFTP endpoint failed.
    #[snafu(display("Failed to connect to {address}: {source}"))]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// SSH session setup (handshake, subsystem start) failed.
    #[snafu(display("SSH session with {address} failed: {source}"))]
    Session {
        address: String,
        source: ssh2::Error,
    },

    /// The server's host key did not pass known-hosts verification.
    #[snafu(display("Host key for {address} rejected: {reason}"))]
    HostKeyRejected { address: String, reason: String },

    /// None of the configured authentication methods were accepted.
    #[snafu(display("Authentication as {user} at {address} failed"))]
    Authentication { user: String, address: String },

    /// SFTP request failed.
    #[snafu(display("SFTP operation on {path} failed: {source}"))]
    Sftp { path: String, source: ssh2::Error },

    /// Entry does not exist.
    #[snafu(display("Entry not found: {path}"))]
    NotFound { path: String },

    /// Failure injected by the in-memory backend.
    #[snafu(display("Backend unavailable: {message}"))]
    Unavailable { message: String },

    /// A blocking storage task panicked or was cancelled.
    #[snafu(display("Storage task failed: {source}"))]
    BlockingTask { source: tokio::task::JoinError },
}

impl StorageError {
    /// Check if this error means the entry is gone (moved away, deleted, never existed).
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source, .. } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            StorageError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            // LIBSSH2_FX_NO_SUCH_FILE
            StorageError::Sftp { source, .. } => matches!(source.code(), ssh2::ErrorCode::SFTP(2)),
            StorageError::NotFound { .. } => true,
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{}", errors.join("\n")))]
    EnvInterpolation { errors: Vec<String> },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// A section required by the selected command is absent.
    #[snafu(display("Configuration section '{section}' is required"))]
    MissingSection { section: String },

    /// A required directory setting is empty.
    #[snafu(display("'{field}' cannot be empty"))]
    EmptyDirectory { field: String },

    /// Two directory settings point at the same location.
    #[snafu(display("'{first}' and '{second}' must be different directories"))]
    SameDirectory { first: String, second: String },

    /// Delimiter is not exactly one byte.
    #[snafu(display("Delimiter must be a single byte, got {value:?}"))]
    InvalidDelimiter { value: String },

    /// A numeric setting is out of range.
    #[snafu(display("'{field}' is out of range: {message}"))]
    OutOfRange { field: String, message: String },

    /// SFTP backend selected but a connection setting is missing.
    #[snafu(display("SFTP backend requires '{field}'"))]
    MissingSftpSetting { field: String },

    /// Schema has no fields.
    #[snafu(display("Schema must have at least one field"))]
    EmptySchema,

    /// Schema declares the same field twice.
    #[snafu(display("Schema declares field '{name}' more than once"))]
    DuplicateField { name: String },

    /// Kafka settings are incomplete.
    #[snafu(display("Kafka configuration is incomplete: {message}"))]
    Kafka { message: String },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics recorder already installed.
    #[snafu(display("Metrics server already initialized"))]
    AlreadyInitialized,

    /// Controller accessed before init.
    #[snafu(display("Metrics server not initialized"))]
    NotInitialized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let io = StorageError::Io {
            path: "/in/a.gz".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(io.is_not_found());

        let denied = StorageError::Io {
            path: "/in/a.gz".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(!denied.is_not_found());

        let injected = StorageError::Unavailable {
            message: "down".to_string(),
        };
        assert!(!injected.is_not_found());
        assert!(
            StorageError::NotFound {
                path: "x".to_string()
            }
            .is_not_found()
        );
    }
}
