//! Config Synchronizer Port
//!
//! Keeps the live proxy's on-disk configuration in step with the
//! routing record and asks the proxy to pick changes up.

use crate::domain::entities::UpstreamTarget;
use crate::domain::ports::ProcessError;
use async_trait::async_trait;
use std::path::PathBuf;

/// Errors patching a proxy config file.
#[derive(Debug, thiserror::Error)]
pub enum FileSyncError {
    #[error("config file not found: {0}")]
    Missing(PathBuf),
    #[error("config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config backup {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid patch pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result of a successful patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub path: PathBuf,
    pub backup_path: PathBuf,
    pub replacements: usize,
}

/// Synchronizes proxy config files and drives proxy reloads.
#[async_trait]
pub trait ConfigSynchronizer: Send + Sync {
    /// Rewrite record `record_id`'s config from `old` to `new`.
    async fn patch(
        &self,
        record_id: i64,
        old: &UpstreamTarget,
        new: &UpstreamTarget,
    ) -> Result<PatchReport, FileSyncError>;

    /// Ask the live proxy to reload its configuration.
    async fn reload(&self) -> Result<(), ProcessError>;

    /// Validate the proxy configuration without applying it.
    async fn test_syntax(&self) -> Result<(), ProcessError>;
}
