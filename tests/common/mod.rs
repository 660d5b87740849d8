//! Common test utilities

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hostlink::exec::{EngineDialer, EngineStream};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Test environment with isolated configuration directory
pub struct TestEnvironment {
    pub config_dir: TempDir,
    pub settings_path: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let config_dir = TempDir::new().expect("Failed to create temp dir");
        let settings_path = config_dir.path().join("settings.toml");
        Self {
            config_dir,
            settings_path,
        }
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

/// Banner the fake engine writes right after the upgrade head
pub const BANNER: &[u8] = b"root@web:/# ";

/// A request as received by [`FakeEngine`]
#[derive(Debug, Clone)]
pub struct Request {
    pub line: String,
    pub body: String,
}

/// Minimal container engine over in-memory pipes.
///
/// Knows one container, `web`. Exec creation fails for shells listed as
/// missing. Started execs echo everything written to them.
#[derive(Default)]
pub struct FakeEngine {
    missing_shells: Vec<String>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_shell(mut self, shell: &str) -> Self {
        self.missing_shells.push(shell.to_string());
        self
    }

    pub fn request_lines(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.line.clone()).collect()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }
}

async fn read_request(server: &mut DuplexStream) -> Option<Request> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if server.read(&mut byte).await.ok()? == 0 {
            return None;
        }
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head).into_owned();
    let len = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; len];
    server.read_exact(&mut body).await.ok()?;
    Some(Request {
        line: head.lines().next().unwrap_or("").to_string(),
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn json(status: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        status,
        body.len(),
        body
    )
    .into_bytes()
}

fn route(request: &Request, missing_shells: &[String]) -> (Vec<u8>, bool) {
    let path = request.line.split(' ').nth(1).unwrap_or("");
    if let Some(container) = path
        .strip_prefix("/containers/")
        .and_then(|rest| rest.strip_suffix("/exec"))
    {
        if container != "web" {
            let msg = format!(r#"{{"message":"No such container: {}"}}"#, container);
            return (json("404 Not Found", &msg), false);
        }
        let create: serde_json::Value = serde_json::from_str(&request.body).unwrap_or_default();
        let shell = create["Cmd"][0].as_str().unwrap_or("").to_string();
        if missing_shells.contains(&shell) {
            let msg = format!(r#"{{"message":"{} not found in $PATH"}}"#, shell);
            return (json("500 Internal Server Error", &msg), false);
        }
        let id = format!(r#"{{"Id":"exec-{}"}}"#, shell.trim_start_matches("/bin/"));
        return (json("201 Created", &id), false);
    }
    if path.starts_with("/exec/") && path.ends_with("/start") {
        let mut reply = b"HTTP/1.1 101 UPGRADED\r\n\
            Content-Type: application/vnd.docker.raw-stream\r\n\
            Connection: Upgrade\r\nUpgrade: tcp\r\n\r\n"
            .to_vec();
        reply.extend_from_slice(BANNER);
        return (reply, true);
    }
    if path.starts_with("/exec/") && path.contains("/resize?") {
        return (b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec(), false);
    }
    (json("404 Not Found", r#"{"message":"page not found"}"#), false)
}

#[async_trait]
impl EngineDialer for FakeEngine {
    async fn dial(&self) -> std::io::Result<Box<dyn EngineStream>> {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let requests = self.requests.clone();
        let missing = self.missing_shells.clone();
        tokio::spawn(async move {
            let Some(request) = read_request(&mut server).await else {
                return;
            };
            let (reply, hijack) = route(&request, &missing);
            requests.lock().push(request);
            if server.write_all(&reply).await.is_err() || !hijack {
                return;
            }
            let mut buf = [0u8; 1024];
            loop {
                match server.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if server.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(Box::new(client))
    }
}
