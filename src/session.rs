//! Session and connector contracts shared by the SSH and container-exec
//! backends.
//!
//! A [`Connector`] turns a [`ConnectorConfig`] into a live [`Session`]. The
//! gateway pumps bytes through `read`/`write`, forwards terminal size changes
//! through `resize` and tears the session down with `close`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectorConfig, ConnectorKind, Settings};
use crate::error::{ConnectError, SessionError};
use crate::exec::ExecConnector;
use crate::ssh::SshConnector;

/// An interactive byte stream to a remote shell.
///
/// Methods take `&self` so one session can be shared between the gateway's
/// read pump, its write pump and the registry. Writes and resizes are
/// serialized internally; reads may run concurrently with them.
#[async_trait]
pub trait Session: Send + Sync {
    /// Send bytes to the remote program's stdin. Returns the number written.
    async fn write(&self, data: &[u8]) -> Result<usize, SessionError>;

    /// Read remote output into `buf`. `Ok(0)` means the stream ended.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, SessionError>;

    /// Push a new terminal size to the remote PTY.
    async fn resize(&self, rows: u16, cols: u16) -> Result<(), SessionError>;

    /// Release the underlying connection. Calling it again is a no-op.
    async fn close(&self) -> Result<(), SessionError>;
}

#[async_trait]
impl<S: Session + ?Sized> Session for Arc<S> {
    async fn write(&self, data: &[u8]) -> Result<usize, SessionError> {
        (**self).write(data).await
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, SessionError> {
        (**self).read(buf).await
    }

    async fn resize(&self, rows: u16, cols: u16) -> Result<(), SessionError> {
        (**self).resize(rows, cols).await
    }

    async fn close(&self) -> Result<(), SessionError> {
        (**self).close().await
    }
}

#[async_trait]
impl<S: Session + ?Sized> Session for Box<S> {
    async fn write(&self, data: &[u8]) -> Result<usize, SessionError> {
        (**self).write(data).await
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, SessionError> {
        (**self).read(buf).await
    }

    async fn resize(&self, rows: u16, cols: u16) -> Result<(), SessionError> {
        (**self).resize(rows, cols).await
    }

    async fn close(&self) -> Result<(), SessionError> {
        (**self).close().await
    }
}

/// Produces sessions for one backend.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dial, authenticate and start a shell.
    ///
    /// Returns [`ConnectError::Cancelled`] as soon as `cancel` fires while the
    /// handshake is still running.
    async fn connect(
        &self,
        cancel: &CancellationToken,
        config: &ConnectorConfig,
    ) -> Result<Box<dyn Session>, ConnectError>;
}

/// Pick the connector implementation for a kind tag.
pub fn connector_for(kind: ConnectorKind, settings: &Settings) -> Arc<dyn Connector> {
    match kind {
        ConnectorKind::Ssh => Arc::new(SshConnector::new(settings.ssh.clone())),
        ConnectorKind::ContainerExec => Arc::new(ExecConnector::from_settings(&settings.exec)),
    }
}

/// Run a handshake as its own task and race it against `cancel`.
///
/// If cancellation wins, the task is left to finish on its own; a session it
/// produces afterwards is closed instead of being dropped on the floor.
pub async fn handshake_or_cancel<S, F>(
    cancel: &CancellationToken,
    handshake: F,
) -> Result<S, ConnectError>
where
    S: Session + 'static,
    F: Future<Output = Result<S, ConnectError>> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(ConnectError::Cancelled);
    }

    let mut task = tokio::spawn(handshake);

    tokio::select! {
        biased;
        joined = &mut task => match joined {
            Ok(result) => result,
            Err(e) => Err(ConnectError::Task(e.to_string())),
        },
        _ = cancel.cancelled() => {
            tracing::debug!("Connect cancelled before handshake completed");
            tokio::spawn(async move {
                if let Ok(Ok(session)) = task.await {
                    tracing::debug!("Closing session from abandoned handshake");
                    if let Err(e) = session.close().await {
                        tracing::warn!("Failed to close abandoned session: {}", e);
                    }
                }
            });
            Err(ConnectError::Cancelled)
        }
    }
}
