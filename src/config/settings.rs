use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Process-wide settings stored in settings.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub exec: ExecSettings,
    #[serde(default)]
    pub sftp: SftpLimits,
    #[serde(default)]
    pub registry: RegistrySettings,
}

impl Settings {
    /// Load from the default location, writing defaults if the file is missing
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::paths::settings_file().ok_or_else(|| ConfigError::ReadFile {
            path: PathBuf::from("settings.toml"),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine settings file path",
            ),
        })?;

        if !path.exists() {
            let settings = Self::default();
            super::paths::ensure_config_dir().map_err(ConfigError::CreateDir)?;
            settings.save_to(&path)?;
            return Ok(settings);
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content).map_err(|e| ConfigError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

fn default_dial_timeout() -> u64 {
    10
}

fn default_keepalive() -> u64 {
    60
}

fn default_inactivity_timeout() -> u64 {
    3600
}

fn default_command_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SshSettings {
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
    /// 0 disables keepalive
    #[serde(default = "default_keepalive")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    /// Upper bound for helper commands (identity lookups)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl SshSettings {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Build the russh client config from these settings
    pub fn client_config(&self) -> russh::client::Config {
        let keepalive = if self.keepalive_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.keepalive_interval_secs))
        };

        russh::client::Config {
            inactivity_timeout: Some(Duration::from_secs(self.inactivity_timeout_secs)),
            keepalive_interval: keepalive,
            keepalive_max: 3,
            ..Default::default()
        }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            dial_timeout_secs: default_dial_timeout(),
            keepalive_interval_secs: default_keepalive(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/docker.sock")
}

fn default_shells() -> Vec<String> {
    vec!["/bin/bash".to_string(), "/bin/sh".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecSettings {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Shell candidates in preference order
    #[serde(default = "default_shells")]
    pub shells: Vec<String>,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            shells: default_shells(),
        }
    }
}

pub const DEFAULT_UPLOAD_MAX_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_WRITE_MAX_BYTES: u64 = 2 * 1024 * 1024;
pub const DEFAULT_SEARCH_MAX_RESULTS: usize = 500;
pub const DEFAULT_COPY_CHUNK_BYTES: usize = 32 * 1024;

fn default_upload_max() -> u64 {
    DEFAULT_UPLOAD_MAX_BYTES
}

fn default_write_max() -> u64 {
    DEFAULT_WRITE_MAX_BYTES
}

fn default_search_max() -> usize {
    DEFAULT_SEARCH_MAX_RESULTS
}

fn default_copy_chunk() -> usize {
    DEFAULT_COPY_CHUNK_BYTES
}

/// Hard limits enforced by the SFTP client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SftpLimits {
    #[serde(default = "default_upload_max")]
    pub upload_max_bytes: u64,
    #[serde(default = "default_write_max")]
    pub write_max_bytes: u64,
    #[serde(default = "default_search_max")]
    pub search_max_results: usize,
    #[serde(default = "default_copy_chunk")]
    pub copy_chunk_bytes: usize,
}

impl Default for SftpLimits {
    fn default() -> Self {
        Self {
            upload_max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
            write_max_bytes: DEFAULT_WRITE_MAX_BYTES,
            search_max_results: DEFAULT_SEARCH_MAX_RESULTS,
            copy_chunk_bytes: DEFAULT_COPY_CHUNK_BYTES,
        }
    }
}

fn default_check_interval() -> u64 {
    60
}

fn default_idle_timeout() -> u64 {
    30 * 60
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RegistrySettings {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}
