use async_trait::async_trait;

use crate::error::SshError;

use super::client::SshConnection;

/// Result of executing a command, including output and exit code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// -1 when the server never reported an exit status
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout of a successful run, `None` otherwise or when empty.
    pub fn trimmed_output(&self) -> Option<&str> {
        let out = self.stdout.trim();
        (self.success() && !out.is_empty()).then_some(out)
    }
}

/// Executes short non-interactive commands on the remote side.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandResult, SshError>;
}

#[async_trait]
impl CommandRunner for SshConnection {
    async fn run(&self, command: &str) -> Result<CommandResult, SshError> {
        self.execute(command).await
    }
}
