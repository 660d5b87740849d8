use std::sync::Arc;

use async_trait::async_trait;
use russh::Pty;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectorConfig, ConnectorKind, SshSettings};
use crate::error::{ConnectError, SshError};
use crate::session::{self, Connector, Session};

use super::channel::{PtyHost, ShellChannel};
use super::client::SshConnection;
use super::session::SshSession;

pub const TERM: &str = "xterm-256color";
pub const INITIAL_COLS: u32 = 80;
pub const INITIAL_ROWS: u32 = 24;

pub(crate) const PTY_MODES: [(Pty, u32); 3] = [
    (Pty::ECHO, 1),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// Opens interactive PTY shells over SSH.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    settings: SshSettings,
}

impl SshConnector {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        cancel: &CancellationToken,
        config: &ConnectorConfig,
    ) -> Result<Box<dyn Session>, ConnectError> {
        config.validate(ConnectorKind::Ssh)?;

        let config = config.clone();
        let settings = self.settings.clone();
        let session = session::handshake_or_cancel(cancel, async move {
            let connection = SshConnection::connect(&config, &settings).await?;
            match start_shell(&connection, config.shell.as_deref()).await {
                Ok((channel, early_output)) => Ok(SshSession::new(
                    Arc::new(connection),
                    channel,
                    early_output,
                )),
                Err(e) => {
                    let _ = connection.disconnect().await;
                    Err(e.into())
                }
            }
        })
        .await?;

        Ok(Box::new(session))
    }
}

/// Start the remote shell on a PTY channel.
///
/// With an override the program is exec'd first; if the server rejects that,
/// a fresh channel gets a new PTY and the login shell.
pub(crate) async fn start_shell<H: PtyHost>(
    host: &H,
    shell: Option<&str>,
) -> Result<(H::Channel, Vec<u8>), SshError> {
    let Some(shell) = shell else {
        return login_shell(host).await;
    };

    let custom = async {
        let mut channel = host.open_pty().await?;
        match channel.exec_program(shell).await {
            Ok(early) => Ok((channel, early)),
            Err(e) => {
                let _ = channel.close_channel().await;
                Err(e)
            }
        }
    }
    .await;

    match custom {
        Ok(started) => Ok(started),
        Err(custom_err) => {
            tracing::warn!(
                "Shell '{}' failed on {}, falling back to login shell: {}",
                shell,
                host.address(),
                custom_err
            );
            login_shell(host)
                .await
                .map_err(|login_err| SshError::ShellStart {
                    shell: shell.to_string(),
                    custom: custom_err.to_string(),
                    login: login_err.to_string(),
                })
        }
    }
}

async fn login_shell<H: PtyHost>(host: &H) -> Result<(H::Channel, Vec<u8>), SshError> {
    let mut channel = host.open_pty().await?;
    match channel.start_login_shell().await {
        Ok(early) => Ok((channel, early)),
        Err(e) => {
            let _ = channel.close_channel().await;
            Err(e)
        }
    }
}
