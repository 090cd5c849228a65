//! Process Runner Port
//!
//! Executes external commands. Abstracted so reload and syntax checks can be
//! exercised without a real proxy binary.

use async_trait::async_trait;

/// Errors running an external command.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with status {code}")]
    NonZeroExit { command: String, code: i32 },
    #[error("cannot derive a syntax check from `{0}`")]
    NoTestCommand(String),
}

/// Runs a shell command and reports its exit code.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Returns the exit code; a process killed by a signal reports `-1`.
    async fn run(&self, command: &str) -> Result<i32, ProcessError>;
}
