//! Shell Process Runner
//!
//! Runs proxy control commands (`nginx -s reload`, `nginx -t`) through `sh -c`.

use crate::domain::ports::{ProcessError, ProcessRunner};
use async_trait::async_trait;
use tokio::process::Command;

/// ProcessRunner backed by the system shell.
#[derive(Debug, Clone)]
pub struct ShellProcessRunner {
    shell: String,
}

impl ShellProcessRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl Default for ShellProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRunner for ShellProcessRunner {
    async fn run(&self, command: &str) -> Result<i32, ProcessError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .kill_on_drop(false)
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if code == 0 {
            tracing::debug!(command, "command succeeded");
        } else {
            tracing::warn!(command, code, stderr = %stderr.trim(), "command failed");
        }

        Ok(code)
    }
}
