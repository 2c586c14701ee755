//! SSH command execution and file streaming using russh

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{Channel, ChannelMsg, Disconnect, client};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

use crate::error::ExecError;
use crate::keys::{KeySource, ResolvedKey};
use crate::result::{CommandResult, ConnectionInfo};
use crate::traits::{FileSink, RemoteExecutor, shell_quote};

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Freshly provisioned machines have no known_hosts entry yet
        Ok(true)
    }
}

/// SSH command executor
///
/// Owns one authenticated session, established on first use and reused for
/// every command and file written afterwards.
pub struct SshExecutor {
    conn_info: ConnectionInfo,
    key: ResolvedKey,
    session: Mutex<Option<client::Handle<SshClientHandler>>>,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("conn_info", &self.conn_info)
            .field("key", &self.key)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Create a new SSH executor
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if key resolution fails
    pub fn new(conn_info: ConnectionInfo, key_source: &KeySource) -> Result<Self, ExecError> {
        let key = key_source
            .resolve()
            .map_err(|e| ExecError::SshKeyError(e.to_string()))?;

        Ok(Self {
            conn_info,
            key,
            session: Mutex::new(None),
        })
    }

    /// Get connection info
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.conn_info
    }

    /// Connect and authenticate, unless a session already exists
    ///
    /// # Errors
    /// Returns `ExecError::ConnectionFailed` or `ExecError::AuthenticationFailed`
    #[instrument(skip(self), fields(host = %self.conn_info.host))]
    pub async fn connect(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if session_lock.is_some() {
            return Ok(());
        }

        info!(
            host = %self.conn_info.host,
            port = self.conn_info.port,
            user = %self.conn_info.user,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config::default());

        let mut session = client::connect(
            config,
            (&self.conn_info.host[..], self.conn_info.port),
            SshClientHandler,
        )
        .await
        .map_err(|e| ExecError::ConnectionFailed(e.to_string()))?;

        let authenticated = if let Some(password) = self.key.password() {
            session
                .authenticate_password(&self.conn_info.user, password)
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?
                .success()
        } else if let Some(key_path) = self.key.path() {
            let key_pair = load_secret_key(key_path, self.key.passphrase())
                .map_err(|e| ExecError::SshKeyError(e.to_string()))?;

            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            session
                .authenticate_publickey(
                    &self.conn_info.user,
                    PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                )
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?
                .success()
        } else {
            return Err(ExecError::AuthenticationFailed(
                "no authentication method available".to_string(),
            ));
        };

        if !authenticated {
            return Err(ExecError::AuthenticationFailed(format!(
                "server rejected credentials for {}",
                self.conn_info.user
            )));
        }

        info!(host = %self.conn_info.host, "SSH connected and authenticated");

        *session_lock = Some(session);
        Ok(())
    }

    async fn open_channel(&self) -> Result<Channel<client::Msg>, ExecError> {
        let session_lock = self.session.lock().await;
        let session = session_lock.as_ref().ok_or(ExecError::NotConnected)?;

        session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))
    }

    #[instrument(skip(self, cmd), fields(host = %self.conn_info.host))]
    async fn execute_remote(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        debug!(command = %cmd, "executing remote command");

        let start = Instant::now();
        let mut channel = self.open_channel().await?;

        channel
            .exec(true, cmd)
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let mut status = -1;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    status = exit_status.cast_signed();
                }
                Some(ChannelMsg::Eof | ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        debug!(
            command = %cmd,
            status = status,
            duration = ?duration,
            "remote command completed"
        );

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.connect().await?;
        self.execute_remote(cmd).await
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout_duration: Duration,
    ) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        debug!(command = %cmd, timeout = ?timeout_duration, "executing with timeout");

        // the handshake is not part of the command budget
        self.connect().await?;

        match timeout(timeout_duration, self.execute_remote(cmd)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    command = %cmd,
                    timeout = ?timeout_duration,
                    elapsed = ?start.elapsed(),
                    "command timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    #[instrument(skip(self), fields(host = %self.conn_info.host))]
    async fn create_file(&self, path: &str) -> Result<Box<dyn FileSink>, ExecError> {
        self.connect().await?;

        let channel = self.open_channel().await?;
        channel
            .exec(true, format!("cat > {}", shell_quote(path)))
            .await
            .map_err(|e| ExecError::TransferFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        debug!(path = %path, "opened remote file channel");

        Ok(Box::new(SshFileSink {
            channel,
            path: path.to_string(),
        }))
    }

    fn is_connected(&self) -> bool {
        // best effort: a held lock means someone is using the session
        self.session
            .try_lock()
            .map(|s| s.is_some())
            .unwrap_or(true)
    }

    async fn disconnect(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if let Some(session) = session_lock.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            info!(host = %self.conn_info.host, "SSH disconnected");
        }
        Ok(())
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}

/// Remote file written through `cat` on an exec channel
struct SshFileSink {
    channel: Channel<client::Msg>,
    path: String,
}

impl SshFileSink {
    fn transfer_error(&self, reason: impl ToString) -> ExecError {
        ExecError::TransferFailed {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl FileSink for SshFileSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), ExecError> {
        if let Err(e) = self.channel.data(chunk).await {
            return Err(self.transfer_error(e));
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<(), ExecError> {
        if let Err(e) = self.channel.eof().await {
            return Err(self.transfer_error(e));
        }

        let mut status = None;
        let mut stderr = Vec::new();
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    status = Some(exit_status);
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    stderr.extend_from_slice(&data);
                }
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        match status {
            Some(0) => Ok(()),
            Some(code) => Err(self.transfer_error(format!(
                "remote writer exited with {code}: {}",
                String::from_utf8_lossy(&stderr).trim()
            ))),
            None => Err(self.transfer_error("channel closed before exit status")),
        }
    }
}

/// Builder for `SshExecutor`
pub struct SshExecutorBuilder {
    conn_info: ConnectionInfo,
    key_source: Option<KeySource>,
}

impl SshExecutorBuilder {
    /// Create builder with required fields
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            conn_info: ConnectionInfo::new(host, user),
            key_source: None,
        }
    }

    /// Authenticate with a password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.key_source = Some(KeySource::Password(password.into()));
        self
    }

    /// Authenticate with a private key file and optional passphrase
    #[must_use]
    pub fn with_key_path(
        mut self,
        path: impl Into<std::path::PathBuf>,
        passphrase: Option<String>,
    ) -> Self {
        self.key_source = Some(KeySource::Path {
            path: path.into(),
            passphrase,
        });
        self
    }

    /// Set key from environment variable (base64)
    #[must_use]
    pub fn with_env_key(mut self, var_name: impl Into<String>) -> Self {
        self.key_source = Some(KeySource::Env(var_name.into()));
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.conn_info.port = port;
        self
    }

    /// Build the executor
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` without credentials, or
    /// `ExecError::SshKeyError` if key resolution fails
    pub fn build(self) -> Result<SshExecutor, ExecError> {
        let key_source = self
            .key_source
            .ok_or_else(|| ExecError::ConfigError("no SSH credentials configured".to_string()))?;
        SshExecutor::new(self.conn_info, &key_source)
    }
}
