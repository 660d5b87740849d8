//! hostlink: remote shell, container exec and SFTP connectors
//!
//! A gateway picks a [`session::Connector`] by [`config::ConnectorKind`],
//! opens a [`session::Session`], tracks it in a [`registry::SessionRegistry`]
//! and pumps terminal bytes through it. [`sftp::SftpClient`] covers file
//! operations on the same SSH targets.

pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod registry;
pub mod session;
pub mod sftp;
pub mod ssh;
pub mod validation;

pub(crate) mod security_log;

pub use config::{ConnectorConfig, ConnectorKind, Settings};
pub use error::{ConnectError, SessionError, SftpError};
pub use registry::{RegistryConfig, SessionRegistry};
pub use session::{Connector, Session, connector_for};
