//! Input validation for connector configuration and remote identity names.
//!
//! Everything that ends up on the wire (hostnames, container ids) or inside a
//! remote command line (account names, shell programs) is checked here first.

use std::net::IpAddr;

use regex::Regex;
use std::sync::LazyLock;

/// Validation error with field context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

static DNS_LABEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$").unwrap());

static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_.-]{0,31}$").unwrap());

// POSIX portable account names, plus the trailing '$' used by machine accounts.
static ACCOUNT_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_.-]{0,31}\$?$").unwrap());

static CONTAINER_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]{0,127}$").unwrap());

/// Validate a hostname (DNS name or IP address).
///
/// # Errors
///
/// Returns `ValidationError` if the hostname is empty, too long, or malformed.
pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    let hostname = hostname.trim();

    if hostname.is_empty() {
        return Err(ValidationError::new("host", "Hostname is required"));
    }

    if hostname.len() > 253 {
        return Err(ValidationError::new(
            "host",
            "Hostname exceeds maximum length of 253 characters",
        ));
    }

    if hostname.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    // RFC 1123 labels
    for label in hostname.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(ValidationError::new(
                "host",
                "Hostname labels must be 1-63 characters",
            ));
        }
        if !DNS_LABEL_REGEX.is_match(label) {
            return Err(ValidationError::new(
                "host",
                format!(
                    "Invalid hostname label '{}': must start and end with alphanumeric, may contain hyphens",
                    label
                ),
            ));
        }
    }

    Ok(())
}

/// Validate a TCP port.
pub fn validate_port(port: u16) -> Result<u16, ValidationError> {
    if port == 0 {
        return Err(ValidationError::new("port", "Port must be between 1 and 65535"));
    }
    Ok(port)
}

/// Validate the login user for an SSH connection. Unlike an interactive
/// client there is no local account to fall back to, so it is required.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() {
        return Err(ValidationError::new("user", "Username is required"));
    }
    if !USERNAME_REGEX.is_match(username) {
        return Err(ValidationError::new(
            "user",
            "Username must start with letter or underscore, and contain only alphanumeric, dot, underscore, or hyphen (max 32)",
        ));
    }
    Ok(())
}

/// Validate a container id or name as accepted by the engine API.
pub fn validate_container_id(id: &str) -> Result<(), ValidationError> {
    if !CONTAINER_ID_REGEX.is_match(id) {
        return Err(ValidationError::new(
            "container",
            format!("Invalid container id or name '{}'", id),
        ));
    }
    Ok(())
}

/// Validate an account (user or group) name before it is interpolated into
/// a remote lookup command.
pub fn validate_account_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if !ACCOUNT_NAME_REGEX.is_match(name) {
        return Err(ValidationError::new(
            field,
            format!("Invalid account name '{}'", name),
        ));
    }
    Ok(())
}

/// Validate a shell program path.
pub fn validate_shell(shell: &str) -> Result<(), ValidationError> {
    if shell.trim().is_empty() {
        return Err(ValidationError::new("shell", "Shell must not be empty"));
    }
    if shell.chars().any(|c| c.is_control()) {
        return Err(ValidationError::new(
            "shell",
            "Shell must not contain control characters",
        ));
    }
    Ok(())
}
