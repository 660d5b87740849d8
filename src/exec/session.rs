use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::session::Session;

use super::client::{EngineClient, HijackedStream};

/// Interactive shell attached to a container exec.
///
/// The hijacked connection is split; `close` cancels a pending read,
/// shuts down the write side and drops both halves.
pub struct ExecSession {
    client: EngineClient,
    exec_id: String,
    container: String,
    reader: Mutex<Option<ReadHalf<HijackedStream>>>,
    writer: Mutex<Option<WriteHalf<HijackedStream>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecSession")
            .field("container", &self.container)
            .field("exec_id", &self.exec_id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ExecSession {
    pub fn new(
        client: EngineClient,
        container: impl Into<String>,
        exec_id: impl Into<String>,
        stream: HijackedStream,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            client,
            exec_id: exec_id.into(),
            container: container.into(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn exec_id(&self) -> &str {
        &self.exec_id
    }

    pub fn container(&self) -> &str {
        &self.container
    }
}

#[async_trait]
impl Session for ExecSession {
    async fn write(&self, data: &[u8]) -> Result<usize, SessionError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(SessionError::Closed)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(data.len())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, SessionError> {
        let mut reader = self.reader.lock().await;
        let Some(reader) = reader.as_mut() else {
            return Ok(0);
        };
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Ok(0),
            n = reader.read(buf) => Ok(n?),
        }
    }

    async fn resize(&self, rows: u16, cols: u16) -> Result<(), SessionError> {
        // Same lock as write keeps input and size changes in order
        let writer = self.writer.lock().await;
        if writer.is_none() {
            return Err(SessionError::Closed);
        }
        self.client.resize_exec(&self.exec_id, rows, cols).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("Exec {} write shutdown failed: {}", self.exec_id, e);
            }
        }
        self.reader.lock().await.take();

        tracing::debug!("Exec session {} in {} closed", self.exec_id, self.container);
        Ok(())
    }
}
