//! Remote command execution over a single long-lived SSH session.

use crate::command::{CommandError, CommandOutput};
use crate::{CommandRunner, shell_join, shell_quote};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use russh::ChannelMsg;
use russh::client::{Config, Handle, Handler};
use russh::keys::PrivateKeyWithHashAlg;
use russh_sftp::client::SftpSession;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

fn default_port() -> u16 {
    22
}

/// Connection settings for an SSH host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    /// Password auth; when set, no key is tried.
    #[serde(default)]
    pub password: Option<String>,
    /// Private key used when no password is configured.
    #[serde(default)]
    pub identity_file: Option<Utf8PathBuf>,
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("identity_file", &self.identity_file)
            .finish()
    }
}

impl SshConfig {
    fn host(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// Keys tried when neither a password nor an identity file is configured.
    fn default_identity_files() -> Vec<Utf8PathBuf> {
        let Ok(home) = std::env::var("HOME") else {
            return Vec::new();
        };
        let ssh_dir = Utf8PathBuf::from(home).join(".ssh");
        vec![ssh_dir.join("id_ed25519"), ssh_dir.join("id_rsa")]
    }
}

/// Accepts every host key: ferry only connects to hosts named in its own config.
#[derive(Clone, Debug, Default)]
pub struct ClientHandler;

impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

type SessionHandle = Handle<ClientHandler>;

/// One authenticated SSH connection, opened on first use and shared by every
/// command and SFTP transfer that goes through it.
pub struct SshSession {
    config: SshConfig,
    ssh_config: Arc<Config>,
    // Commands are serialized over the one handle.
    handle: Mutex<Option<SessionHandle>>,
    closed: AtomicBool,
}

impl SshSession {
    pub fn new(config: SshConfig) -> Self {
        let ssh_config = Config {
            inactivity_timeout: Some(Duration::from_secs(300)),
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        Self {
            config,
            ssh_config: Arc::new(ssh_config),
            handle: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn connection_error(&self, error: impl fmt::Display) -> CommandError {
        CommandError::Connection {
            host: self.config.host(),
            error: error.to_string(),
        }
    }

    fn auth_error(&self, error: impl fmt::Display) -> CommandError {
        CommandError::Authentication {
            user: self.config.username.clone(),
            host: self.config.host(),
            error: error.to_string(),
        }
    }

    /// Lock the session, connecting first if there is no live handle.
    async fn connected(&self) -> Result<MutexGuard<'_, Option<SessionHandle>>, CommandError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CommandError::Closed);
        }
        let mut guard = self.handle.lock().await;
        let needs_connect = match guard.as_ref() {
            None => true,
            Some(handle) => handle.is_closed(),
        };
        if needs_connect {
            *guard = Some(self.connect().await?);
        }
        Ok(guard)
    }

    async fn connect(&self) -> Result<SessionHandle, CommandError> {
        tracing::info!(
            "Connecting to {}@{}",
            self.config.username,
            self.config.host()
        );
        let mut handle = russh::client::connect(
            self.ssh_config.clone(),
            (self.config.hostname.as_str(), self.config.port),
            ClientHandler,
        )
        .await
        .map_err(|e| self.connection_error(e))?;

        let authenticated = if let Some(password) = &self.config.password {
            handle
                .authenticate_password(self.config.username.clone(), password.clone())
                .await
                .map_err(|e| self.auth_error(e))?
                .success()
        } else {
            let candidates = match &self.config.identity_file {
                Some(path) => vec![path.clone()],
                None => SshConfig::default_identity_files(),
            };
            self.authenticate_with_keys(&mut handle, &candidates).await?
        };

        if !authenticated {
            return Err(self.auth_error("server rejected credentials"));
        }
        Ok(handle)
    }

    async fn authenticate_with_keys(
        &self,
        handle: &mut SessionHandle,
        candidates: &[Utf8PathBuf],
    ) -> Result<bool, CommandError> {
        for path in candidates {
            if !path.exists() {
                tracing::debug!("Skipping missing identity file {}", path);
                continue;
            }
            let key = russh::keys::load_secret_key(path, None)
                .map_err(|e| self.auth_error(format!("failed to load key {path}: {e}")))?;
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .map_err(|e| self.auth_error(e))?
                .flatten();
            let result = handle
                .authenticate_publickey(
                    self.config.username.clone(),
                    PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                )
                .await
                .map_err(|e| self.auth_error(e))?;
            if result.success() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run one command line on the remote host.
    pub async fn exec(
        &self,
        command_line: &str,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        let guard = self.connected().await?;
        let handle = guard.as_ref().ok_or(CommandError::Closed)?;
        let exec_error = |e: russh::Error| CommandError::Execution {
            command: command_line.to_string(),
            error: e.to_string(),
        };

        tracing::debug!("Executing on {}: {}", self.config.hostname, command_line);
        let mut channel = handle.channel_open_session().await.map_err(exec_error)?;
        channel.exec(true, command_line).await.map_err(exec_error)?;
        if let Some(input) = stdin {
            channel.data(input.as_bytes()).await.map_err(exec_error)?;
        }
        channel.eof().await.map_err(exec_error)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = -1;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = exit_status as i32,
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    /// Start an SFTP subsystem on a fresh channel.
    pub async fn sftp(&self) -> Result<SftpSession, CommandError> {
        let guard = self.connected().await?;
        let handle = guard.as_ref().ok_or(CommandError::Closed)?;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| self.connection_error(e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| self.connection_error(e))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| self.connection_error(e))
    }

    /// Disconnect. Only the first call does anything.
    pub async fn close(&self) -> Result<(), CommandError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            tracing::info!("Closing SSH session to {}", self.config.host());
            handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
                .map_err(|e| self.connection_error(e))?;
        }
        Ok(())
    }
}

/// Build the remote command line, emulating a working directory with `cd`.
pub fn remote_command_line(command: &str, args: &[String], cwd: Option<&Utf8Path>) -> String {
    let line = shell_join(command, args);
    match cwd {
        Some(dir) => format!("cd {} && {}", shell_quote(dir.as_str()), line),
        None => line,
    }
}

/// [`CommandRunner`] that executes on a remote host.
#[derive(Clone)]
pub struct SshRunner {
    session: Arc<SshSession>,
}

impl SshRunner {
    pub fn new(config: SshConfig) -> Self {
        Self::with_session(Arc::new(SshSession::new(config)))
    }

    pub fn with_session(session: Arc<SshSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SshSession> {
        &self.session
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        stdin: Option<&str>,
        cwd: Option<&Utf8Path>,
    ) -> Result<CommandOutput, CommandError> {
        let line = remote_command_line(command, args, cwd);
        self.session.exec(&line, stdin).await
    }

    async fn close(&self) -> Result<(), CommandError> {
        self.session.close().await
    }
}
