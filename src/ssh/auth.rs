use std::sync::Arc;

use russh::keys::{HashAlg, PrivateKeyWithHashAlg};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{AuthType, ConnectorConfig};
use crate::error::ConfigError;

/// Authentication material ready to hand to russh
pub enum ResolvedAuth {
    /// Password authentication with zeroized secret string
    Password(SecretString),
    /// Public key authentication with a parsed key
    PublicKey(PrivateKeyWithHashAlg),
}

impl std::fmt::Debug for ResolvedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedAuth::Password(_) => f.debug_tuple("Password").field(&"[REDACTED]").finish(),
            ResolvedAuth::PublicKey(_) => f.debug_tuple("PublicKey").field(&"[KEY]").finish(),
        }
    }
}

impl ResolvedAuth {
    /// Build the auth method from a connector config.
    ///
    /// Configuration problems fail here, before any network traffic.
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, ConfigError> {
        Self::build(config.auth_type, &config.secret)
    }

    /// Same as [`ResolvedAuth::from_config`] for an auth type still in its
    /// string form.
    pub fn from_parts(auth_type: &str, secret: &SecretString) -> Result<Self, ConfigError> {
        Self::build(auth_type.parse()?, secret)
    }

    fn build(auth_type: AuthType, secret: &SecretString) -> Result<Self, ConfigError> {
        match auth_type {
            AuthType::Password => Ok(ResolvedAuth::Password(SecretString::from(
                secret.expose_secret().to_owned(),
            ))),
            AuthType::PrivateKey => parse_private_key(secret.expose_secret()),
        }
    }

    /// Method name as used in security logs
    pub fn method_name(&self) -> &'static str {
        match self {
            ResolvedAuth::Password(_) => "password",
            ResolvedAuth::PublicKey(_) => "publickey",
        }
    }
}

fn parse_private_key(pem: &str) -> Result<ResolvedAuth, ConfigError> {
    let trimmed = pem.trim_start();
    let first_line = trimmed.lines().next().unwrap_or("");

    if first_line.starts_with("ssh-") || first_line.starts_with("ecdsa-") {
        return Err(ConfigError::InvalidPrivateKey(
            "secret contains a PUBLIC key, not a private key".to_string(),
        ));
    }

    if !first_line.starts_with("-----BEGIN") {
        return Err(ConfigError::InvalidPrivateKey(
            "secret does not look like a PEM or OpenSSH private key".to_string(),
        ));
    }

    let key = russh::keys::decode_secret_key(trimmed, None)
        .map_err(|e| ConfigError::InvalidPrivateKey(e.to_string()))?;

    // RSA keys sign with SHA-512; other algorithms use their native scheme
    let hash_alg = if key.algorithm().is_rsa() {
        Some(HashAlg::Sha512)
    } else {
        None
    };

    Ok(ResolvedAuth::PublicKey(PrivateKeyWithHashAlg::new(
        Arc::new(key),
        hash_alg,
    )))
}
