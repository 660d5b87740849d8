use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::validation;

/// How the `secret` of a [`ConnectorConfig`] is to be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// `secret` is the account password
    Password,
    /// `secret` is an OpenSSH/PEM encoded private key
    PrivateKey,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Password => "password",
            AuthType::PrivateKey => "private_key",
        }
    }
}

impl FromStr for AuthType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(AuthType::Password),
            "private_key" => Ok(AuthType::PrivateKey),
            other => Err(ConfigError::UnsupportedAuthType(other.to_string())),
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which connector implementation serves a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    Ssh,
    ContainerExec,
}

impl FromStr for ConnectorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ssh" => Ok(ConnectorKind::Ssh),
            "container_exec" | "docker" => Ok(ConnectorKind::ContainerExec),
            other => Err(ConfigError::Invalid(validation::ValidationError {
                field: "kind".to_string(),
                message: format!("Unknown connector kind '{}'", other),
            })),
        }
    }
}

/// Connection parameters for a single connect/open call.
///
/// For [`ConnectorKind::ContainerExec`] the `host` field carries the
/// container id or name; `port`, `user` and `secret` are unused.
#[derive(Deserialize)]
#[serde(try_from = "RawConnectorConfig")]
pub struct ConnectorConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth_type: AuthType,
    pub secret: SecretString,
    pub shell: Option<String>,
}

impl ConnectorConfig {
    pub fn password(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            auth_type: AuthType::Password,
            secret: SecretString::from(password.into()),
            shell: None,
        }
    }

    pub fn private_key(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        key_pem: impl Into<String>,
    ) -> Self {
        Self {
            auth_type: AuthType::PrivateKey,
            ..Self::password(host, port, user, key_pem)
        }
    }

    /// Target a container by id or name.
    pub fn container(container: impl Into<String>) -> Self {
        Self::password(container, 0, "", "")
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// `host:port` as used in dial errors and logs
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the fields the given connector kind relies on.
    pub fn validate(&self, kind: ConnectorKind) -> Result<(), ConfigError> {
        match kind {
            ConnectorKind::Ssh => {
                validation::validate_hostname(&self.host)?;
                validation::validate_port(self.port)?;
                validation::validate_username(&self.user)?;
            }
            ConnectorKind::ContainerExec => {
                validation::validate_container_id(&self.host)?;
            }
        }
        if let Some(shell) = &self.shell {
            validation::validate_shell(shell)?;
        }
        Ok(())
    }
}

impl Clone for ConnectorConfig {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            auth_type: self.auth_type,
            secret: SecretString::from(self.secret.expose_secret().to_owned()),
            shell: self.shell.clone(),
        }
    }
}

impl fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("auth_type", &self.auth_type)
            .field("secret", &"[REDACTED]")
            .field("shell", &self.shell)
            .finish()
    }
}

/// Wire shape accepted from the gateway; `auth_type` stays a string so an
/// unknown value surfaces as `ConfigError::UnsupportedAuthType`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConnectorConfig {
    host: String,
    #[serde(default = "default_ssh_port")]
    port: u16,
    #[serde(default)]
    user: String,
    #[serde(alias = "auth_type")]
    auth_type: String,
    #[serde(default)]
    secret: String,
    #[serde(default)]
    shell: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl TryFrom<RawConnectorConfig> for ConnectorConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConnectorConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            auth_type: raw.auth_type.parse()?,
            host: raw.host,
            port: raw.port,
            user: raw.user,
            secret: SecretString::from(raw.secret),
            shell: raw.shell.filter(|s| !s.trim().is_empty()),
        })
    }
}
