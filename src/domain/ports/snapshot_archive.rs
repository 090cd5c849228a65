//! Snapshot Archive Port
//!
//! Persistence for automatic backups and explicit numbered snapshots.

use crate::domain::entities::{BackupRecord, ProxyRecord, Snapshot, SnapshotTarget};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Errors reading or writing archive artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed archive artifact {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("snapshot {0} not found")]
    SnapshotNotFound(u64),
}

/// Archive of backups and snapshots.
///
/// Snapshot ids are max-existing + 1, which assumes a single writer process.
#[async_trait]
pub trait SnapshotArchive: Send + Sync {
    /// Write the write-once backup of a service's original record.
    async fn backup_initial(
        &self,
        service_name: &str,
        record: &ProxyRecord,
    ) -> Result<PathBuf, ArchiveError>;

    /// List a service's backups, newest first.
    async fn list_backups(&self, service_name: &str) -> Result<Vec<BackupRecord>, ArchiveError>;

    /// Store a new snapshot and return its id.
    async fn create_snapshot(
        &self,
        description: &str,
        targets: BTreeMap<String, SnapshotTarget>,
    ) -> Result<u64, ArchiveError>;

    async fn load_snapshot(&self, id: u64) -> Result<Snapshot, ArchiveError>;

    /// All snapshots ordered by id.
    async fn list_snapshots(&self) -> Result<Vec<Snapshot>, ArchiveError>;

    /// Delete a snapshot. Returns `false` when it did not exist.
    async fn delete_snapshot(&self, id: u64) -> Result<bool, ArchiveError>;
}
