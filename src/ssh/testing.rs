//! Scripted doubles for the PTY channel seams.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::SshError;

use super::channel::{PtyHost, ShellChannel, ShellEvent};

/// Shared record of every call made on a host and its channels
#[derive(Clone, Debug, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().iter().any(|e| e == entry)
    }
}

#[derive(Debug)]
enum Feed {
    Idle,
    Scripted(mpsc::UnboundedReceiver<ShellEvent>),
    /// Endless output, as from `yes`
    Flood,
}

/// A PTY channel numbered by the order it was opened.
#[derive(Debug)]
pub struct FakeChannel {
    id: usize,
    log: CallLog,
    refuse_exec: bool,
    refuse_shell: bool,
    banner: Vec<u8>,
    feed: Feed,
}

impl FakeChannel {
    fn new(id: usize, log: CallLog) -> Self {
        Self {
            id,
            log,
            refuse_exec: false,
            refuse_shell: false,
            banner: Vec::new(),
            feed: Feed::Idle,
        }
    }

    /// Channel whose server events come from the returned sender. Dropping
    /// the sender ends the channel.
    pub fn scripted(log: &CallLog) -> (Self, mpsc::UnboundedSender<ShellEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channel = Self::new(1, log.clone());
        channel.feed = Feed::Scripted(rx);
        (channel, tx)
    }

    pub fn flooding(log: &CallLog) -> Self {
        let mut channel = Self::new(1, log.clone());
        channel.feed = Feed::Flood;
        channel
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

#[async_trait]
impl ShellChannel for FakeChannel {
    async fn exec_program(&mut self, program: &str) -> Result<Vec<u8>, SshError> {
        self.log.push(format!("exec#{} {}", self.id, program));
        if self.refuse_exec {
            return Err(SshError::Channel(
                "server refused exec: request rejected".to_string(),
            ));
        }
        Ok(self.banner.clone())
    }

    async fn start_login_shell(&mut self) -> Result<Vec<u8>, SshError> {
        self.log.push(format!("shell#{}", self.id));
        if self.refuse_shell {
            return Err(SshError::Channel(
                "server refused shell: request rejected".to_string(),
            ));
        }
        Ok(self.banner.clone())
    }

    async fn next_event(&mut self) -> ShellEvent {
        match &mut self.feed {
            Feed::Idle => std::future::pending().await,
            Feed::Scripted(rx) => rx.recv().await.unwrap_or(ShellEvent::Ended),
            Feed::Flood => ShellEvent::Output(vec![b'y'; 512]),
        }
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), SshError> {
        self.log
            .push(format!("data#{} {}", self.id, String::from_utf8_lossy(data)));
        Ok(())
    }

    async fn resize_pty(&mut self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.log.push(format!("resize#{} {}x{}", self.id, cols, rows));
        Ok(())
    }

    async fn send_eof(&mut self) -> Result<(), SshError> {
        self.log.push(format!("eof#{}", self.id));
        Ok(())
    }

    async fn close_channel(&mut self) -> Result<(), SshError> {
        self.log.push(format!("close#{}", self.id));
        Ok(())
    }
}

/// Host that grants PTYs and answers exec and shell requests as configured.
#[derive(Default)]
pub struct FakeHost {
    log: CallLog,
    opened: AtomicUsize,
    refuse_pty: bool,
    refuse_exec: bool,
    refuse_shell: bool,
    banner: Vec<u8>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing_pty(mut self) -> Self {
        self.refuse_pty = true;
        self
    }

    pub fn refusing_exec(mut self) -> Self {
        self.refuse_exec = true;
        self
    }

    pub fn refusing_shell(mut self) -> Self {
        self.refuse_shell = true;
        self
    }

    /// Output sent before the exec or shell request is acknowledged
    pub fn with_banner(mut self, banner: &[u8]) -> Self {
        self.banner = banner.to_vec();
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

#[async_trait]
impl PtyHost for FakeHost {
    type Channel = FakeChannel;

    async fn open_pty(&self) -> Result<FakeChannel, SshError> {
        let id = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.push(format!("pty#{}", id));
        if self.refuse_pty {
            return Err(SshError::PtyRequest("request rejected".to_string()));
        }
        let mut channel = FakeChannel::new(id, self.log.clone());
        channel.refuse_exec = self.refuse_exec;
        channel.refuse_shell = self.refuse_shell;
        channel.banner = self.banner.clone();
        Ok(channel)
    }

    async fn disconnect(&self) -> Result<(), SshError> {
        self.log.push("disconnect".to_string());
        Ok(())
    }

    fn address(&self) -> String {
        "fake.test:22".to_string()
    }
}
