use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectorConfig, ConnectorKind, ExecSettings};
use crate::error::{ConnectError, ExecError};
use crate::security_log;
use crate::session::{self, Connector, Session};

#[cfg(unix)]
use super::client::UnixDialer;
#[cfg(not(unix))]
use super::client::UnsupportedDialer;
use super::client::{EngineClient, EngineDialer};
use super::session::ExecSession;

/// Attaches interactive shells to running containers.
#[derive(Debug, Clone)]
pub struct ExecConnector {
    client: EngineClient,
    shells: Vec<String>,
}

impl ExecConnector {
    pub fn new(dialer: Arc<dyn EngineDialer>, shells: Vec<String>) -> Self {
        Self {
            client: EngineClient::new(dialer),
            shells,
        }
    }

    /// Connector for the engine socket named in `settings`.
    #[cfg(unix)]
    pub fn unix(settings: &ExecSettings) -> Self {
        Self::new(
            Arc::new(UnixDialer::new(settings.socket_path.clone())),
            settings.shells.clone(),
        )
    }

    /// Connector for the platform's engine endpoint. Without Unix sockets
    /// every attach fails with an `Unsupported` I/O error.
    pub fn from_settings(settings: &ExecSettings) -> Self {
        #[cfg(unix)]
        {
            Self::unix(settings)
        }
        #[cfg(not(unix))]
        {
            Self::new(Arc::new(UnsupportedDialer), settings.shells.clone())
        }
    }
}

/// Shells to try, in order: the override, then the configured list.
pub fn shell_candidates(shell_override: Option<&str>, configured: &[String]) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::with_capacity(configured.len() + 1);
    for shell in shell_override.into_iter().chain(configured.iter().map(String::as_str)) {
        if !shell.is_empty() && !candidates.iter().any(|c| c == shell) {
            candidates.push(shell.to_string());
        }
    }
    candidates
}

/// Create an exec with the first shell the engine accepts, then start it.
async fn attach(
    client: EngineClient,
    container: String,
    candidates: Vec<String>,
) -> Result<ExecSession, ExecError> {
    let mut attempts = Vec::new();
    let mut created = None;
    for shell in candidates {
        match client.create_exec(&container, &shell).await {
            Ok(exec_id) => {
                created = Some((shell, exec_id));
                break;
            }
            Err(e) => {
                tracing::debug!("Shell {} unavailable in {}: {}", shell, container, e);
                attempts.push((shell, e.to_string()));
            }
        }
    }

    let Some((shell, exec_id)) = created else {
        return Err(ExecError::NoShell {
            container,
            attempts,
        });
    };

    let stream = client.start_exec(&exec_id).await?;
    security_log::log_exec_attach(&container, &exec_id, &shell);
    tracing::info!("Attached to container {} with {}", container, shell);
    Ok(ExecSession::new(client, container, exec_id, stream))
}

#[async_trait]
impl Connector for ExecConnector {
    async fn connect(
        &self,
        cancel: &CancellationToken,
        config: &ConnectorConfig,
    ) -> Result<Box<dyn Session>, ConnectError> {
        config.validate(ConnectorKind::ContainerExec)?;

        let candidates = shell_candidates(config.shell.as_deref(), &self.shells);
        let client = self.client.clone();
        let container = config.host.clone();
        let session = session::handshake_or_cancel(cancel, async move {
            attach(client, container, candidates)
                .await
                .map_err(ConnectError::from)
        })
        .await?;

        Ok(Box::new(session))
    }
}
