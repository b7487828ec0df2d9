//! SFTP-over-SSH backend on `ssh2`.
//!
//! libssh2 is blocking, so every request runs on tokio's blocking pool. One
//! connection is dialed lazily and then shared by every list, open and rename.
//! The backend never redials on its own: a failed listing drops the cached
//! connection, and the record source's next scan establishes a fresh one.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use ssh2::{CheckResult, KnownHostFileKind, Session, Sftp};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DirEntry, StorageBackend, join, observe};
use crate::error::{
    AuthenticationSnafu, BlockingTaskSnafu, ConnectSnafu, HostKeyRejectedSnafu, IoSnafu, SessionSnafu, SftpSnafu,
    StorageError,
};
use crate::metrics::events::StorageOperation;

const KIND: &str = "sftp";

/// Connection settings for an SFTP intake.
#[derive(Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    /// OpenSSH private key, tried before the password. A leading `~/` expands to `$HOME`.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub private_key_passphrase: Option<String>,
    /// Verify the server against known_hosts. Disabling accepts any host key.
    #[serde(default = "default_host_key_check")]
    pub host_key_check: bool,
    /// Defaults to `$HOME/.ssh/known_hosts`.
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_port() -> u16 {
    22
}

fn default_host_key_check() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl std::fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("private_key_passphrase", &self.private_key_passphrase.as_ref().map(|_| "<redacted>"))
            .field("host_key_check", &self.host_key_check)
            .field("known_hosts_path", &self.known_hosts_path)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl SftpConfig {
    /// `host:port`, as used in logs and errors.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn known_hosts_file(&self) -> PathBuf {
        match &self.known_hosts_path {
            Some(path) => expand_home(path),
            None => home_dir().join(".ssh").join("known_hosts"),
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default()
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// An authentication attempt, in the order they are tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    PublicKey(PathBuf),
    Password,
}

/// Authentication attempts for `config`: the private key when one is
/// configured and present on disk, then always the password.
pub fn auth_methods(config: &SftpConfig) -> Vec<AuthMethod> {
    let mut methods = Vec::with_capacity(2);
    if let Some(path) = &config.private_key_path {
        let path = expand_home(path);
        if path.is_file() {
            methods.push(AuthMethod::PublicKey(path));
        } else {
            warn!(path = %path.display(), "Private key not found, skipping key authentication");
        }
    }
    methods.push(AuthMethod::Password);
    methods
}

/// An authenticated SSH session with its SFTP channel.
struct SftpConnection {
    _session: Session,
    sftp: Sftp,
}

impl SftpConnection {
    fn establish(config: &SftpConfig) -> Result<Self, StorageError> {
        let address = config.address();
        let timeout = Duration::from_secs(config.connect_timeout_secs);

        let tcp = dial(config, timeout).context(ConnectSnafu { address: address.as_str() })?;

        let mut session = Session::new().context(SessionSnafu { address: address.as_str() })?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().context(SessionSnafu { address: address.as_str() })?;

        verify_host_key(&session, config, &address)?;
        authenticate(&session, config, &address)?;

        let sftp = session.sftp().context(SessionSnafu { address: address.as_str() })?;
        info!(%address, user = %config.user, "SFTP connection established");

        Ok(Self {
            _session: session,
            sftp,
        })
    }
}

fn dial(config: &SftpConfig, timeout: Duration) -> std::io::Result<TcpStream> {
    let mut last_error = None;
    for addr in (config.host.as_str(), config.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

fn verify_host_key(session: &Session, config: &SftpConfig, address: &str) -> Result<(), StorageError> {
    if !config.host_key_check {
        warn!(%address, "Host key verification disabled, accepting any host key");
        return Ok(());
    }

    let mut known_hosts = session.known_hosts().context(SessionSnafu { address })?;
    let path = config.known_hosts_file();
    if let Err(e) = known_hosts.read_file(&path, KnownHostFileKind::OpenSSH) {
        warn!(
            %address,
            path = %path.display(),
            error = %e,
            "Could not load known_hosts, accepting any host key"
        );
        return Ok(());
    }

    let Some((key, _)) = session.host_key() else {
        return HostKeyRejectedSnafu {
            address,
            reason: "server presented no host key",
        }
        .fail();
    };

    let reason = match known_hosts.check_port(&config.host, config.port, key) {
        CheckResult::Match => return Ok(()),
        CheckResult::Mismatch => "key does not match the known_hosts entry",
        CheckResult::NotFound => "host is not listed in known_hosts",
        CheckResult::Failure => "known_hosts lookup failed",
    };
    HostKeyRejectedSnafu { address, reason }.fail()
}

fn authenticate(session: &Session, config: &SftpConfig, address: &str) -> Result<(), StorageError> {
    for method in auth_methods(config) {
        let attempt = match &method {
            AuthMethod::PublicKey(path) => {
                session.userauth_pubkey_file(&config.user, None, path, config.private_key_passphrase.as_deref())
            }
            AuthMethod::Password => {
                session.userauth_password(&config.user, config.password.as_deref().unwrap_or_default())
            }
        };
        match attempt {
            Ok(()) if session.authenticated() => {
                debug!(%address, ?method, "Authenticated");
                return Ok(());
            }
            Ok(()) => {}
            Err(e) => warn!(%address, ?method, error = %e, "Authentication attempt failed"),
        }
    }
    AuthenticationSnafu {
        user: config.user.as_str(),
        address,
    }
    .fail()
}

/// Intake directories on a remote SFTP server.
#[derive(Clone)]
pub struct SftpBackend {
    config: Arc<SftpConfig>,
    connection: Arc<Mutex<Option<SftpConnection>>>,
}

impl std::fmt::Debug for SftpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SftpBackend<{}>", self.describe())
    }
}

impl SftpBackend {
    /// Create the backend. Nothing is dialed until the first request.
    pub fn new(config: SftpConfig) -> Self {
        Self {
            config: Arc::new(config),
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `request` against the shared connection on the blocking pool.
    ///
    /// With `drop_on_error`, a failed request discards the connection.
    async fn with_connection<T, F>(&self, drop_on_error: bool, request: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T, StorageError> + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        let slot = Arc::clone(&self.connection);

        tokio::task::spawn_blocking(move || {
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            let connection = match slot.take() {
                Some(connection) => connection,
                None => SftpConnection::establish(&config)?,
            };

            let result = request(&connection.sftp);
            if result.is_ok() || !drop_on_error {
                *slot = Some(connection);
            } else {
                debug!(address = %config.address(), "Discarding SFTP connection");
            }
            result
        })
        .await
        .context(BlockingTaskSnafu)?
    }
}

#[async_trait]
impl StorageBackend for SftpBackend {
    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>, StorageError> {
        let dir = dir.to_string();
        observe(
            KIND,
            StorageOperation::List,
            self.with_connection(true, move |sftp| {
                let listing = sftp.readdir(Path::new(&dir)).context(SftpSnafu { path: dir.as_str() })?;
                Ok(listing
                    .into_iter()
                    .filter(|(_, stat)| !stat.is_dir())
                    .filter_map(|(path, stat)| {
                        let name = path.file_name()?.to_string_lossy().into_owned();
                        Some(DirEntry {
                            name,
                            size: stat.size.unwrap_or_default(),
                        })
                    })
                    .collect())
            }),
        )
        .await
    }

    async fn open(&self, dir: &str, name: &str) -> Result<Bytes, StorageError> {
        let path = join(dir, name);
        observe(
            KIND,
            StorageOperation::Open,
            self.with_connection(false, move |sftp| {
                let mut file = sftp.open(Path::new(&path)).context(SftpSnafu { path: path.as_str() })?;
                let mut data = Vec::new();
                file.read_to_end(&mut data).context(IoSnafu { path: path.as_str() })?;
                Ok(Bytes::from(data))
            }),
        )
        .await
    }

    async fn rename(&self, from_dir: &str, to_dir: &str, name: &str) -> Result<(), StorageError> {
        let from = join(from_dir, name);
        let to = join(to_dir, name);
        observe(
            KIND,
            StorageOperation::Rename,
            self.with_connection(false, move |sftp| {
                sftp.rename(Path::new(&from), Path::new(&to), None)
                    .context(SftpSnafu { path: from.as_str() })
            }),
        )
        .await
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn describe(&self) -> String {
        format!("sftp://{}@{}", self.config.user, self.config.address())
    }
}
