use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::{Channel, ChannelMsg, Disconnect};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{ConnectorConfig, SshSettings};
use crate::error::SshError;
use crate::security_log;

use super::auth::ResolvedAuth;
use super::command::CommandResult;
use super::handler::ClientHandler;

/// An authenticated SSH transport connection.
///
/// Shared by the PTY session and the SFTP client: both open their channels
/// on top of one of these and tear it down with [`SshConnection::disconnect`].
pub struct SshConnection {
    handle: Handle<ClientHandler>,
    host: String,
    port: u16,
    command_timeout: Duration,
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl SshConnection {
    /// Dial `config.host:config.port` and authenticate.
    ///
    /// The TCP dial and the handshake+auth phase each get
    /// `settings.dial_timeout_secs`.
    pub async fn connect(
        config: &ConnectorConfig,
        settings: &SshSettings,
    ) -> Result<Self, SshError> {
        // Bad auth config never reaches the network
        let auth = ResolvedAuth::from_config(config)?;

        let addr = config.address();
        let dial_timeout = settings.dial_timeout();

        let stream = timeout(dial_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SshError::Timeout(addr.clone()))?
            .map_err(|e| SshError::ConnectionFailed {
                host: config.host.clone(),
                port: config.port,
                reason: e.to_string(),
            })?;

        match timeout(dial_timeout, Self::establish(config, settings, stream, auth)).await {
            Ok(result) => result,
            Err(_) => Err(SshError::Timeout(addr)),
        }
    }

    async fn establish(
        config: &ConnectorConfig,
        settings: &SshSettings,
        stream: TcpStream,
        auth: ResolvedAuth,
    ) -> Result<Self, SshError> {
        let handler = ClientHandler::new(config.host.clone(), config.port);
        let mut handle =
            client::connect_stream(Arc::new(settings.client_config()), stream, handler)
                .await
                .map_err(|e| SshError::ConnectionFailed {
                    host: config.host.clone(),
                    port: config.port,
                    reason: e.to_string(),
                })?;

        authenticate(&mut handle, &config.user, auth, &config.host, config.port).await?;

        tracing::info!("SSH connected to {}:{}", config.host, config.port);
        Ok(Self {
            handle,
            host: config.host.clone(),
            port: config.port,
            command_timeout: settings.command_timeout(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Open a new session channel on this connection.
    pub async fn open_channel(&self) -> Result<Channel<client::Msg>, SshError> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(format!("Failed to open channel: {}", e)))
    }

    /// Run a command on a fresh exec channel and collect its output.
    pub async fn execute(&self, command: &str) -> Result<CommandResult, SshError> {
        let run = async {
            let mut channel = self.open_channel().await?;
            channel
                .exec(true, command)
                .await
                .map_err(|e| SshError::Channel(format!("Failed to exec '{}': {}", command, e)))?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_code: i32 = -1;

            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                    Some(ChannelMsg::ExtendedData { data, .. }) => {
                        stderr.extend_from_slice(&data)
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = exit_status as i32;
                    }
                    Some(ChannelMsg::Failure) => {
                        return Err(SshError::Channel(format!(
                            "Server refused to exec '{}'",
                            command
                        )));
                    }
                    Some(ChannelMsg::Eof) => {}
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }

            Ok(CommandResult {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_code,
            })
        };

        match timeout(self.command_timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(SshError::Channel(format!(
                "Command '{}' timed out after {} seconds",
                command,
                self.command_timeout.as_secs()
            ))),
        }
    }

    /// Close the transport connection.
    pub async fn disconnect(&self) -> Result<(), SshError> {
        let result = self
            .handle
            .disconnect(Disconnect::ByApplication, "session closed", "en")
            .await
            .map_err(|e| SshError::Channel(e.to_string()));
        security_log::log_ssh_disconnect(&self.host, self.port, result.is_ok());
        result
    }
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    username: &str,
    auth: ResolvedAuth,
    hostname: &str,
    port: u16,
) -> Result<(), SshError> {
    let method_name = auth.method_name();
    security_log::log_auth_attempt(hostname, port, username, method_name);

    let attempt = match auth {
        // expose_secret() only at the point of authentication
        ResolvedAuth::Password(password) => {
            handle
                .authenticate_password(username, password.expose_secret())
                .await
        }
        ResolvedAuth::PublicKey(key) => handle.authenticate_publickey(username, key).await,
    };

    let auth_result = match attempt {
        Ok(result) => result,
        Err(e) => {
            let reason = e.to_string();
            security_log::log_auth_failure(hostname, port, username, method_name, &reason);
            return Err(SshError::AuthenticationFailed(reason));
        }
    };

    if !auth_result.success() {
        let reason = "Authentication rejected by server";
        security_log::log_auth_failure(hostname, port, username, method_name, reason);
        return Err(SshError::AuthenticationFailed(reason.to_string()));
    }

    security_log::log_auth_success(hostname, port, username, method_name);
    Ok(())
}
