//! Docker-based SSH test fixtures

use std::path::PathBuf;
use std::process::Command;
use std::sync::{LazyLock, Once};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hostlink::config::{ConnectorConfig, Settings};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, timeout};

// Ensure Docker containers are started only once per test run
static DOCKER_INIT: Once = Once::new();
static DOCKER_AVAILABLE: AtomicBool = AtomicBool::new(false);
static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Configuration for the test SSH server
#[derive(Debug, Clone)]
pub struct TestSshServer {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for TestSshServer {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2222,
            username: "testuser".to_string(),
            password: "testpass123".to_string(),
        }
    }
}

/// Start Docker containers for SSH testing
pub fn ensure_docker_started() {
    DOCKER_INIT.call_once(|| {
        let docker_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/docker");

        if Command::new("docker").arg("--version").output().is_err() {
            eprintln!("WARNING: Docker not available, SSH integration tests will be skipped");
            return;
        }

        let status = if Command::new("docker")
            .args(["compose", "version"])
            .output()
            .is_ok_and(|o| o.status.success())
        {
            Command::new("docker")
                .current_dir(&docker_dir)
                .args(["compose", "up", "-d", "--wait"])
                .status()
        } else {
            Command::new("docker-compose")
                .current_dir(&docker_dir)
                .args(["up", "-d", "--wait"])
                .status()
        };

        match status {
            Ok(s) if s.success() => {
                DOCKER_AVAILABLE.store(true, Ordering::SeqCst);
                eprintln!("SSH test container started");
            }
            Ok(s) => eprintln!("Failed to start SSH test container: exit code {:?}", s.code()),
            Err(e) => eprintln!("Failed to start SSH test container: {}", e),
        }
    });
}

/// Check if Docker containers are running
pub fn is_docker_available() -> bool {
    ensure_docker_started();
    DOCKER_AVAILABLE.load(Ordering::SeqCst)
}

/// Wait until the server sends its SSH identification line.
///
/// Docker's port proxy accepts TCP before sshd is listening, so a bare
/// connect is not enough.
pub async fn wait_for_ssh_ready(host: &str, port: u16) -> Result<(), String> {
    let addr = format!("{}:{}", host, port);
    let max_attempts = 60;

    for _ in 0..max_attempts {
        let banner = timeout(Duration::from_secs(2), async {
            let mut stream = TcpStream::connect(&addr).await.ok()?;
            let mut ident = [0u8; 4];
            stream.read_exact(&mut ident).await.ok()?;
            Some(ident)
        })
        .await;
        if let Ok(Some(ident)) = banner {
            if &ident == b"SSH-" {
                return Ok(());
            }
        }
        sleep(Duration::from_millis(500)).await;
    }

    Err(format!("SSH server not ready after {} attempts", max_attempts))
}

/// Serialises tests that share the one server account
pub async fn acquire_test_lock() -> MutexGuard<'static, ()> {
    TEST_LOCK.lock().await
}

/// A reachable test server plus default settings
pub struct SshTestEnvironment {
    pub server: TestSshServer,
    pub settings: Settings,
}

impl SshTestEnvironment {
    pub async fn new() -> Result<Self, String> {
        if !is_docker_available() {
            return Err("Docker not available".to_string());
        }

        let server = TestSshServer::default();
        wait_for_ssh_ready(&server.host, server.port).await?;

        Ok(Self {
            server,
            settings: Settings::default(),
        })
    }

    pub fn password_config(&self) -> ConnectorConfig {
        ConnectorConfig::password(
            self.server.host.clone(),
            self.server.port,
            self.server.username.clone(),
            self.server.password.clone(),
        )
    }
}

/// Macro to skip tests when Docker is not available
#[macro_export]
macro_rules! skip_if_no_docker {
    () => {
        if !super::fixtures::is_docker_available() {
            eprintln!("Skipping test: Docker not available");
            return;
        }
    };
}
