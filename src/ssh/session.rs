use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{SessionError, SshError};
use crate::session::Session;

use super::channel::{PtyHost, ShellChannel, ShellEvent};

/// Commands that can be sent to the channel task
enum ChannelCommand {
    Data(Vec<u8>, oneshot::Sender<Result<(), SshError>>),
    WindowChange {
        cols: u32,
        rows: u32,
        reply: oneshot::Sender<Result<(), SshError>>,
    },
}

/// Remote output queued by the channel task, drained by `read`.
pub(crate) struct OutputBuffer {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl OutputBuffer {
    pub(crate) fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            pos: 0,
        }
    }

    /// Copy queued output into `buf`, waiting for more if none is queued.
    /// Returns 0 once the channel task has gone away.
    pub(crate) async fn read_into(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        while self.pos >= self.pending.len() {
            match self.rx.recv().await {
                Some(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                None => return 0,
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// Interactive PTY session over SSH.
///
/// A background task owns the channel. Writes and window changes travel to it
/// through a command queue guarded by one mutex, so they stay ordered with
/// respect to each other; output flows back through a separate queue that
/// `read` drains without touching that mutex. `close` fires a shutdown token
/// that the task honours even while it is parked on a full output queue.
pub struct SshSession {
    commands: Mutex<mpsc::Sender<ChannelCommand>>,
    output: Mutex<OutputBuffer>,
    shutdown: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    address: String,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("address", &self.address)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SshSession {
    /// Take ownership of a started shell channel and its connection.
    ///
    /// `early_output` holds anything the server sent while the shell request
    /// was being acknowledged.
    pub(crate) fn new<H: PtyHost>(
        host: Arc<H>,
        channel: H::Channel,
        early_output: Vec<u8>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel::<ChannelCommand>(64);
        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(256);
        let shutdown = CancellationToken::new();
        let address = host.address();

        if !early_output.is_empty() {
            // Fresh queue with spare capacity
            let _ = output_tx.try_send(early_output);
        }

        let task = tokio::spawn(pump(
            host,
            channel,
            command_rx,
            output_tx,
            shutdown.clone(),
        ));

        Self {
            commands: Mutex::new(command_tx),
            output: Mutex::new(OutputBuffer::new(output_rx)),
            shutdown,
            task: parking_lot::Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
            address,
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    async fn send_command(
        &self,
        command: ChannelCommand,
        reply: oneshot::Receiver<Result<(), SshError>>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        let commands = self.commands.lock().await;
        commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)?;
        // Commands still queued when the task stops are dropped unanswered
        reply.await.map_err(|_| SessionError::Closed)??;
        Ok(())
    }
}

/// Drive the channel until shutdown or until the session is dropped.
/// Teardown order is EOF, channel close, disconnect.
async fn pump<H: PtyHost>(
    host: Arc<H>,
    mut channel: H::Channel,
    mut commands: mpsc::Receiver<ChannelCommand>,
    output_tx: mpsc::Sender<Vec<u8>>,
    shutdown: CancellationToken,
) {
    let mut output_tx = Some(output_tx);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            cmd = commands.recv() => {
                match cmd {
                    Some(ChannelCommand::Data(data, reply)) => {
                        let _ = reply.send(channel.send_data(&data).await);
                    }
                    Some(ChannelCommand::WindowChange { cols, rows, reply }) => {
                        let _ = reply.send(channel.resize_pty(cols, rows).await);
                    }
                    None => break,
                }
            }
            event = channel.next_event(), if output_tx.is_some() => {
                match event {
                    ShellEvent::Output(data) => {
                        let Some(tx) = &output_tx else { continue };
                        // A reader that stopped draining must not hold up close
                        let delivered = tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break,
                            sent = tx.send(data) => sent.is_ok(),
                        };
                        if !delivered {
                            tracing::debug!("SSH output reader gone");
                            output_tx = None;
                        }
                    }
                    ShellEvent::Exited(status) => {
                        tracing::debug!("Remote shell exited with status {}", status);
                    }
                    ShellEvent::Ended => {
                        // Dropping the sender ends pending reads with 0
                        output_tx = None;
                    }
                    ShellEvent::Other => {}
                }
            }
        }
    }

    // Pending reads see EOF during teardown
    drop(output_tx);
    drop(commands);

    if let Err(e) = channel.send_eof().await {
        tracing::debug!("Failed to send EOF: {}", e);
    }
    if let Err(e) = channel.close_channel().await {
        tracing::debug!("Failed to close channel: {}", e);
    }
    if let Err(e) = host.disconnect().await {
        tracing::debug!("Failed to disconnect: {}", e);
    }
}

#[async_trait]
impl Session for SshSession {
    async fn write(&self, data: &[u8]) -> Result<usize, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(ChannelCommand::Data(data.to_vec(), reply_tx), reply_rx)
            .await?;
        Ok(data.len())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, SessionError> {
        let mut output = self.output.lock().await;
        Ok(output.read_into(buf).await)
    }

    async fn resize(&self, rows: u16, cols: u16) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = ChannelCommand::WindowChange {
            cols: cols as u32,
            rows: rows as u32,
            reply: reply_tx,
        };
        self.send_command(command, reply_rx).await
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("SSH channel task for {} failed: {}", self.address, e);
            }
        }
        tracing::debug!("SSH session to {} closed", self.address);
        Ok(())
    }
}
