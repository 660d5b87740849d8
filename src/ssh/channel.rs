//! The slice of the SSH protocol that shell sessions rely on.
//!
//! [`PtyHost`] opens PTY channels on a connection and [`ShellChannel`] drives
//! one of them. Both are implemented for the russh types; the shell selection
//! policy and the session pump only see the traits.

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};

use crate::error::SshError;

use super::client::SshConnection;
use super::connector::{INITIAL_COLS, INITIAL_ROWS, PTY_MODES, TERM};

/// Something the remote side sent on a shell channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ShellEvent {
    /// stdout or stderr bytes
    Output(Vec<u8>),
    Exited(u32),
    /// EOF, close, or the channel went away
    Ended,
    Other,
}

/// A session channel with a PTY already granted.
#[async_trait]
pub(crate) trait ShellChannel: Send + 'static {
    /// Exec `program` with want-reply. Output that arrives before the
    /// server's answer is returned.
    async fn exec_program(&mut self, program: &str) -> Result<Vec<u8>, SshError>;

    /// Request the account's login shell with want-reply.
    async fn start_login_shell(&mut self) -> Result<Vec<u8>, SshError>;

    /// Next message from the server. Must be cancel safe.
    async fn next_event(&mut self) -> ShellEvent;

    async fn send_data(&mut self, data: &[u8]) -> Result<(), SshError>;
    async fn resize_pty(&mut self, cols: u32, rows: u32) -> Result<(), SshError>;
    async fn send_eof(&mut self) -> Result<(), SshError>;
    async fn close_channel(&mut self) -> Result<(), SshError>;
}

/// A connection that can hand out PTY channels.
#[async_trait]
pub(crate) trait PtyHost: Send + Sync + 'static {
    type Channel: ShellChannel;

    /// Open a session channel and get a PTY granted on it.
    async fn open_pty(&self) -> Result<Self::Channel, SshError>;

    async fn disconnect(&self) -> Result<(), SshError>;

    /// `host:port` for logs
    fn address(&self) -> String;
}

/// Wait for the server's answer to a want-reply channel request.
///
/// Output that arrives before the answer is appended to `early`.
async fn await_reply(channel: &mut Channel<Msg>, early: &mut Vec<u8>) -> Result<(), String> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => return Err("request rejected".to_string()),
            Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                early.extend_from_slice(&data);
            }
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                return Err("channel closed before reply".to_string());
            }
            Some(_) => {}
        }
    }
}

#[async_trait]
impl ShellChannel for Channel<Msg> {
    async fn exec_program(&mut self, program: &str) -> Result<Vec<u8>, SshError> {
        self.exec(true, program)
            .await
            .map_err(|e| SshError::Channel(format!("exec request failed: {}", e)))?;
        let mut early = Vec::new();
        await_reply(self, &mut early)
            .await
            .map_err(|reason| SshError::Channel(format!("server refused exec: {}", reason)))?;
        Ok(early)
    }

    async fn start_login_shell(&mut self) -> Result<Vec<u8>, SshError> {
        self.request_shell(true)
            .await
            .map_err(|e| SshError::Channel(format!("shell request failed: {}", e)))?;
        let mut early = Vec::new();
        await_reply(self, &mut early)
            .await
            .map_err(|reason| SshError::Channel(format!("server refused shell: {}", reason)))?;
        Ok(early)
    }

    async fn next_event(&mut self) -> ShellEvent {
        match self.wait().await {
            Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                ShellEvent::Output(data.to_vec())
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => ShellEvent::Exited(exit_status),
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => ShellEvent::Ended,
            Some(_) => ShellEvent::Other,
        }
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), SshError> {
        self.data(data).await.map_err(SshError::from)
    }

    async fn resize_pty(&mut self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.window_change(cols, rows, 0, 0)
            .await
            .map_err(SshError::from)
    }

    async fn send_eof(&mut self) -> Result<(), SshError> {
        self.eof().await.map_err(SshError::from)
    }

    async fn close_channel(&mut self) -> Result<(), SshError> {
        self.close().await.map_err(SshError::from)
    }
}

#[async_trait]
impl PtyHost for SshConnection {
    type Channel = Channel<Msg>;

    async fn open_pty(&self) -> Result<Channel<Msg>, SshError> {
        let mut channel = self.open_channel().await?;
        channel
            .request_pty(true, TERM, INITIAL_COLS, INITIAL_ROWS, 0, 0, &PTY_MODES)
            .await
            .map_err(|e| SshError::PtyRequest(e.to_string()))?;

        let mut ignored = Vec::new();
        if let Err(reason) = await_reply(&mut channel, &mut ignored).await {
            let _ = channel.close().await;
            return Err(SshError::PtyRequest(reason));
        }
        Ok(channel)
    }

    async fn disconnect(&self) -> Result<(), SshError> {
        SshConnection::disconnect(self).await
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }
}
