#[cfg(unix)]
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ExecError;

use super::http::{self, ReadAhead, ResponseHead};
use super::stream::ReplayStream;

/// Byte stream to the engine API
pub trait EngineStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> EngineStream for T {}

/// Connection after a successful exec start
pub type HijackedStream = ReplayStream<Box<dyn EngineStream>>;

/// Opens connections to the container engine.
#[async_trait]
pub trait EngineDialer: Send + Sync {
    async fn dial(&self) -> std::io::Result<Box<dyn EngineStream>>;
}

/// Dials the engine over its Unix socket.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixDialer {
    path: PathBuf,
}

#[cfg(unix)]
impl UnixDialer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
#[async_trait]
impl EngineDialer for UnixDialer {
    async fn dial(&self) -> std::io::Result<Box<dyn EngineStream>> {
        let stream = tokio::net::UnixStream::connect(&self.path).await?;
        Ok(Box::new(stream))
    }
}

/// Stand-in where the engine socket cannot be reached; every dial fails.
#[cfg(not(unix))]
#[derive(Debug, Clone, Default)]
pub struct UnsupportedDialer;

#[cfg(not(unix))]
#[async_trait]
impl EngineDialer for UnsupportedDialer {
    async fn dial(&self) -> std::io::Result<Box<dyn EngineStream>> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "engine socket requires Unix domain sockets",
        ))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecCreateRequest<'a> {
    attach_stdin: bool,
    attach_stdout: bool,
    attach_stderr: bool,
    tty: bool,
    cmd: [&'a str; 1],
}

#[derive(Deserialize)]
struct ExecCreateResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecStartRequest {
    detach: bool,
    tty: bool,
}

#[derive(Deserialize)]
struct EngineErrorBody {
    message: String,
}

/// Client for the engine's exec endpoints.
#[derive(Clone)]
pub struct EngineClient {
    dialer: Arc<dyn EngineDialer>,
}

impl std::fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineClient").finish_non_exhaustive()
    }
}

impl EngineClient {
    pub fn new(dialer: Arc<dyn EngineDialer>) -> Self {
        Self { dialer }
    }

    /// One request on a fresh connection; returns status and body.
    async fn request(
        &self,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(ResponseHead, Vec<u8>), ExecError> {
        let mut conn = self.dialer.dial().await?;
        http::write_request(
            &mut conn,
            "POST",
            path,
            &[("Connection", "close")],
            body.as_deref(),
        )
        .await?;

        let mut reader = ReadAhead::new(conn);
        let head = reader.read_head().await?;
        let body = reader.read_body(&head).await?;
        Ok((head, body))
    }

    /// Create an exec instance running `shell` with a TTY attached.
    /// Returns the exec id.
    pub async fn create_exec(&self, container: &str, shell: &str) -> Result<String, ExecError> {
        let path = format!("/containers/{}/exec", urlencoding::encode(container));
        let body = serde_json::to_vec(&ExecCreateRequest {
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            tty: true,
            cmd: [shell],
        })?;

        let (head, body) = self.request(&path, Some(body)).await?;
        if !matches!(head.status, 200 | 201) {
            return Err(status_error("exec create", head.status, &body));
        }
        let created: ExecCreateResponse = serde_json::from_slice(&body)?;
        tracing::debug!("Created exec {} in {} running {}", created.id, container, shell);
        Ok(created.id)
    }

    /// Start an exec and take over the connection as a raw stream.
    ///
    /// 101 and 200 both mean the engine switched the connection to the
    /// exec's stdio.
    pub async fn start_exec(&self, exec_id: &str) -> Result<HijackedStream, ExecError> {
        let path = format!("/exec/{}/start", urlencoding::encode(exec_id));
        let body = serde_json::to_vec(&ExecStartRequest {
            detach: false,
            tty: true,
        })?;

        let mut conn = self.dialer.dial().await?;
        http::write_request(
            &mut conn,
            "POST",
            &path,
            &[("Connection", "Upgrade"), ("Upgrade", "tcp")],
            Some(&body),
        )
        .await?;

        let mut reader = ReadAhead::new(conn);
        let head = reader.read_head().await?;
        match head.status {
            101 | 200 => {
                let (conn, leftover) = reader.into_parts();
                if !leftover.is_empty() {
                    tracing::debug!("Replaying {} bytes read with exec start head", leftover.len());
                }
                Ok(ReplayStream::new(conn, leftover))
            }
            status => {
                let body = reader.read_body(&head).await.unwrap_or_default();
                Err(status_error("exec start", status, &body))
            }
        }
    }

    /// Resize the exec's TTY on a separate connection.
    pub async fn resize_exec(&self, exec_id: &str, rows: u16, cols: u16) -> Result<(), ExecError> {
        let path = format!(
            "/exec/{}/resize?h={}&w={}",
            urlencoding::encode(exec_id),
            rows,
            cols
        );
        let (head, body) = self.request(&path, None).await?;
        if !matches!(head.status, 200 | 201) {
            return Err(status_error("exec resize", head.status, &body));
        }
        Ok(())
    }
}

fn status_error(operation: &'static str, status: u16, body: &[u8]) -> ExecError {
    let body = match serde_json::from_slice::<EngineErrorBody>(body) {
        Ok(err) => err.message,
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    };
    ExecError::Status {
        operation,
        status,
        body,
    }
}
