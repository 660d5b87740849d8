use std::path::PathBuf;
use thiserror::Error;

use crate::validation::ValidationError;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unsupported auth type: {0}")]
    UnsupportedAuthType(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create config directory: {0}")]
    CreateDir(std::io::Error),
}

/// SSH-related errors
#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed to {host}:{port}: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Timeout connecting to {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("PTY request failed: {0}")]
    PtyRequest(String),

    #[error("Failed to start shell '{shell}': {custom}; login shell fallback failed: {login}")]
    ShellStart {
        shell: String,
        custom: String,
        login: String,
    },

    #[error("russh error: {0}")]
    Russh(String),
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::Russh(err.to_string())
    }
}

/// Container engine (exec API) errors
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Engine socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed engine response: {0}")]
    MalformedResponse(String),

    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("Invalid engine JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No usable shell in container {container}: {}", format_attempts(.attempts))]
    NoShell {
        container: String,
        attempts: Vec<(String, String)>,
    },
}

fn format_attempts(attempts: &[(String, String)]) -> String {
    attempts
        .iter()
        .map(|(shell, reason)| format!("{}: {}", shell, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// SFTP-related errors
#[derive(Error, Debug)]
pub enum SftpError {
    #[error("SFTP connection failed: {0}")]
    ConnectionFailed(String),

    #[error("File operation failed: {0}")]
    FileOperation(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("{path} exceeds the {limit} byte limit")]
    TooLarge { path: String, limit: u64 },

    #[error("{0} is not a UTF-8 text file")]
    NotText(String),

    #[error("Identity lookup failed: {0}")]
    Identity(String),

    #[error(transparent)]
    Ssh(#[from] SshError),
}

/// Errors surfaced by an open session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session is closed")]
    Closed,

    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Errors returned by `Connector::connect`
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Connect cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("Handshake task failed: {0}")]
    Task(String),
}
