//! PTY shell sessions over SSH

use std::time::Duration;

use hostlink::ConnectError;
use hostlink::config::ConnectorConfig;
use hostlink::error::SshError;
use hostlink::session::{Connector, Session};
use hostlink::ssh::SshConnector;
use tokio_util::sync::CancellationToken;

use super::fixtures::SshTestEnvironment;

/// Read until `needle` shows up in the output
async fn read_until(session: &dyn Session, needle: &str) -> String {
    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    while !String::from_utf8_lossy(&seen).contains(needle) {
        let n = tokio::time::timeout(Duration::from_secs(10), session.read(&mut buf))
            .await
            .expect("read timed out")
            .expect("read failed");
        assert!(n > 0, "shell ended early: {}", String::from_utf8_lossy(&seen));
        seen.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&seen).into_owned()
}

#[tokio::test]
async fn test_login_shell_runs_commands() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SshTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    let connector = SshConnector::new(env.settings.ssh.clone());

    let session = connector
        .connect(&CancellationToken::new(), &env.password_config())
        .await
        .expect("connect should succeed");

    // The echoed command line holds the expression, only the shell's answer holds 42
    session.write(b"echo marker-$((40+2))\n").await.unwrap();
    read_until(session.as_ref(), "marker-42").await;

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_shell_override_is_exec() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SshTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    let connector = SshConnector::new(env.settings.ssh.clone());
    let config = env.password_config().with_shell("/bin/sh");

    let session = connector
        .connect(&CancellationToken::new(), &config)
        .await
        .expect("connect should succeed");

    session.write(b"echo override-$((1+1))\n").await.unwrap();
    read_until(session.as_ref(), "override-2").await;

    session.resize(40, 120).await.unwrap();
    session.write(b"stty size\n").await.unwrap();
    read_until(session.as_ref(), "40 120").await;

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_close_with_undrained_output() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SshTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    let connector = SshConnector::new(env.settings.ssh.clone());

    let session = connector
        .connect(&CancellationToken::new(), &env.password_config())
        .await
        .expect("connect should succeed");

    session.write(b"yes\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    tokio::time::timeout(Duration::from_secs(10), session.close())
        .await
        .expect("close hung with unread output")
        .unwrap();
}

#[tokio::test]
async fn test_wrong_password_fails() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SshTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    let connector = SshConnector::new(env.settings.ssh.clone());
    let config = ConnectorConfig::password(
        env.server.host.clone(),
        env.server.port,
        env.server.username.clone(),
        "wrong",
    );

    let err = connector
        .connect(&CancellationToken::new(), &config)
        .await
        .err().expect("expected Err");
    assert!(
        matches!(err, ConnectError::Ssh(SshError::AuthenticationFailed(_))),
        "unexpected error: {:?}",
        err
    );
}
