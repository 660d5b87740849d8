//! Security event logging for audit trails.
//!
//! Structured events for authentication, host keys, and session lifecycle.
//! Everything is logged with `target: "security"` so a deployment can route
//! or filter these separately, e.g. `RUST_LOG=security=info`.

use tracing::{info, warn};

/// Log an SSH authentication attempt.
pub fn log_auth_attempt(host: &str, port: u16, username: &str, method: &str) {
    info!(
        target: "security",
        event = "auth_attempt",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        "SSH authentication attempt"
    );
}

/// Log a successful SSH authentication.
pub fn log_auth_success(host: &str, port: u16, username: &str, method: &str) {
    info!(
        target: "security",
        event = "auth_success",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        "SSH authentication succeeded"
    );
}

/// Log a failed SSH authentication attempt.
pub fn log_auth_failure(host: &str, port: u16, username: &str, method: &str, reason: &str) {
    warn!(
        target: "security",
        event = "auth_failure",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        reason = %reason,
        "SSH authentication failed"
    );
}

/// Log the host key presented by a server.
pub fn log_host_key_seen(host: &str, port: u16, fingerprint: &str, algorithm: &str) {
    info!(
        target: "security",
        event = "host_key_seen",
        host = %host,
        port = port,
        fingerprint = %fingerprint,
        algorithm = %algorithm,
        "Server host key presented"
    );
}

/// Log an SFTP connection establishment.
pub fn log_sftp_connect(host: &str, port: u16, username: &str) {
    info!(
        target: "security",
        event = "sftp_connect",
        host = %host,
        port = port,
        username = %username,
        "SFTP connection established"
    );
}

/// Log an exec attach to a container.
pub fn log_exec_attach(container: &str, exec_id: &str, shell: &str) {
    info!(
        target: "security",
        event = "exec_attach",
        container = %container,
        exec_id = %exec_id,
        shell = %shell,
        "Attached to container exec"
    );
}

/// Log an SSH session or SFTP connection being torn down.
pub fn log_ssh_disconnect(host: &str, port: u16, clean: bool) {
    info!(
        target: "security",
        event = "ssh_disconnect",
        host = %host,
        port = port,
        clean = clean,
        "SSH connection closed"
    );
}

/// Log an idle session being evicted by the registry.
pub fn log_session_evicted(session_id: &str, idle_secs: u64) {
    warn!(
        target: "security",
        event = "session_evicted",
        session_id = %session_id,
        idle_secs = idle_secs,
        "Session closed after idle timeout"
    );
}
