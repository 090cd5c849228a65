//! Nginx Config Synchronizer
//!
//! Patches per-record proxy host files (`<conf_dir>/<id>.<ext>`) and drives
//! the proxy's reload and syntax-check commands through a ProcessRunner.
//!
//! Every patch first writes an immutable, timestamped copy of the file's
//! previous content to the backup directory, then replaces the file via
//! write-to-temp + rename.

use crate::domain::entities::UpstreamTarget;
use crate::domain::ports::{
    ConfigSynchronizer, FileSyncError, PatchReport, ProcessError, ProcessRunner,
};
use crate::domain::services::patch_upstream;
use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Reload action flag replaced to derive the syntax check.
const RELOAD_FLAG: &str = "-s reload";
const TEST_FLAG: &str = "-t";

/// File-based config synchronizer for nginx-style proxies.
pub struct NginxConfigSync {
    conf_dir: PathBuf,
    extension: String,
    backup_dir: PathBuf,
    reload_command: String,
    runner: Arc<dyn ProcessRunner>,
}

impl NginxConfigSync {
    pub fn new(
        conf_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        backup_dir: impl Into<PathBuf>,
        reload_command: impl Into<String>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            conf_dir: conf_dir.into(),
            extension: extension.into(),
            backup_dir: backup_dir.into(),
            reload_command: reload_command.into(),
            runner,
        }
    }

    /// Path of the config file for a record.
    pub fn config_path(&self, record_id: i64) -> PathBuf {
        self.conf_dir
            .join(format!("{}.{}", record_id, self.extension))
    }

    /// Derive the syntax check command from a reload command.
    ///
    /// # Examples
    /// ```
    /// use upstream_failover::adapters::outbound::NginxConfigSync;
    ///
    /// assert_eq!(
    ///     NginxConfigSync::test_command("docker exec proxy nginx -s reload").as_deref(),
    ///     Some("docker exec proxy nginx -t")
    /// );
    /// assert_eq!(NginxConfigSync::test_command("systemctl reload nginx"), None);
    /// ```
    pub fn test_command(reload_command: &str) -> Option<String> {
        reload_command
            .contains(RELOAD_FLAG)
            .then(|| reload_command.replacen(RELOAD_FLAG, TEST_FLAG, 1))
    }

    /// Write the pre-patch content to a new, never-overwritten backup file.
    async fn write_backup(&self, record_id: i64, content: &str) -> Result<PathBuf, FileSyncError> {
        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|source| FileSyncError::Backup {
                path: self.backup_dir.clone(),
                source,
            })?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}.{}.{}.bak", record_id, self.extension, stamp)
            } else {
                format!("{}.{}.{}-{}.bak", record_id, self.extension, stamp, attempt)
            };
            let path = self.backup_dir.join(name);

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())
                        .await
                        .map_err(|source| FileSyncError::Backup {
                            path: path.clone(),
                            source,
                        })?;
                    file.flush().await.map_err(|source| FileSyncError::Backup {
                        path: path.clone(),
                        source,
                    })?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < 100 => {
                    attempt += 1;
                }
                Err(source) => return Err(FileSyncError::Backup { path, source }),
            }
        }
    }

    /// Replace `path` with `content` through a sibling temp file.
    async fn replace_file(path: &Path, content: &str) -> Result<(), FileSyncError> {
        let tmp = path.with_extension("tmp");
        let io_err = |source| FileSyncError::Io {
            path: path.to_path_buf(),
            source,
        };
        tokio::fs::write(&tmp, content).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        Ok(())
    }

    async fn run_checked(&self, command: &str) -> Result<(), ProcessError> {
        match self.runner.run(command).await? {
            0 => Ok(()),
            code => Err(ProcessError::NonZeroExit {
                command: command.to_string(),
                code,
            }),
        }
    }
}

#[async_trait]
impl ConfigSynchronizer for NginxConfigSync {
    async fn patch(
        &self,
        record_id: i64,
        old: &UpstreamTarget,
        new: &UpstreamTarget,
    ) -> Result<PatchReport, FileSyncError> {
        let path = self.config_path(record_id);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FileSyncError::Missing(path));
            }
            Err(source) => return Err(FileSyncError::Io { path, source }),
        };

        let backup_path = self.write_backup(record_id, &content).await?;
        let outcome = patch_upstream(&content, old, new)?;

        if outcome.is_noop() {
            tracing::warn!(
                path = %path.display(),
                old = %old,
                "no upstream occurrences matched, config left as is"
            );
        }

        Self::replace_file(&path, &outcome.content).await?;

        tracing::info!(
            path = %path.display(),
            backup = %backup_path.display(),
            replacements = outcome.replacements,
            "patched proxy config {} -> {}",
            old,
            new
        );

        Ok(PatchReport {
            path,
            backup_path,
            replacements: outcome.replacements,
        })
    }

    async fn reload(&self) -> Result<(), ProcessError> {
        self.run_checked(&self.reload_command).await?;
        tracing::info!(command = %self.reload_command, "proxy reloaded");
        Ok(())
    }

    async fn test_syntax(&self) -> Result<(), ProcessError> {
        let command = Self::test_command(&self.reload_command)
            .ok_or_else(|| ProcessError::NoTestCommand(self.reload_command.clone()))?;
        self.run_checked(&command).await?;
        tracing::info!(command = %command, "proxy config syntax ok");
        Ok(())
    }
}
