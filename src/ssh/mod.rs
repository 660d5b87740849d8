//! SSH transport: dial, authentication, PTY sessions and remote commands.

pub mod auth;
pub(crate) mod channel;
pub mod client;
pub mod command;
pub mod connector;
pub mod handler;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use client::SshConnection;
pub use command::{CommandResult, CommandRunner};
pub use connector::SshConnector;
pub use session::SshSession;
