//! JSON File Archive
//!
//! Implements SnapshotArchive with one pretty-printed JSON file per artifact:
//! - backups:   `<backup_dir>/<service>_<timestamp>.json`
//! - snapshots: `<snapshot_dir>/snapshot_<id>.json`
//!
//! Artifacts are created with `create_new`, so an existing file is never
//! overwritten.

use crate::domain::entities::{BackupRecord, ProxyRecord, Snapshot, SnapshotTarget};
use crate::domain::ports::{ArchiveError, SnapshotArchive};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const SNAPSHOT_PREFIX: &str = "snapshot_";
const JSON_EXT: &str = ".json";

/// Archive stored as JSON files on local disk.
#[derive(Debug, Clone)]
pub struct JsonFileArchive {
    backup_dir: PathBuf,
    snapshot_dir: PathBuf,
}

impl JsonFileArchive {
    pub fn new(backup_dir: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            snapshot_dir: snapshot_dir.into(),
        }
    }

    pub fn snapshot_path(&self, id: u64) -> PathBuf {
        self.snapshot_dir
            .join(format!("{}{}{}", SNAPSHOT_PREFIX, id, JSON_EXT))
    }

    fn io_err(path: &Path) -> impl Fn(std::io::Error) -> ArchiveError + '_ {
        move |source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Write `value` to a file that must not exist yet.
    async fn write_new<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), ArchiveError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Self::io_err(parent))?;
        }
        let body = serde_json::to_vec_pretty(value).map_err(|source| ArchiveError::Serde {
            path: path.to_path_buf(),
            source,
        })?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(Self::io_err(path))?;
        file.write_all(&body).await.map_err(Self::io_err(path))?;
        file.flush().await.map_err(Self::io_err(path))?;
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArchiveError> {
        let body = tokio::fs::read(path).await.map_err(Self::io_err(path))?;
        serde_json::from_slice(&body).map_err(|source| ArchiveError::Serde {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File names in `dir`; a missing directory reads as empty.
    async fn file_names(dir: &Path) -> Result<Vec<String>, ArchiveError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(dir)(e)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Self::io_err(dir))? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn parse_snapshot_id(name: &str) -> Option<u64> {
        name.strip_prefix(SNAPSHOT_PREFIX)?
            .strip_suffix(JSON_EXT)?
            .parse()
            .ok()
    }

    /// Existing snapshot ids in ascending order.
    async fn snapshot_ids(&self) -> Result<Vec<u64>, ArchiveError> {
        let mut ids: Vec<u64> = Self::file_names(&self.snapshot_dir)
            .await?
            .iter()
            .filter_map(|n| Self::parse_snapshot_id(n))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl SnapshotArchive for JsonFileArchive {
    async fn backup_initial(
        &self,
        service_name: &str,
        record: &ProxyRecord,
    ) -> Result<PathBuf, ArchiveError> {
        let backup = BackupRecord::initial(service_name, record);
        let stamp = backup.timestamp.format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let path = self
            .backup_dir
            .join(format!("{}_{}{}", service_name, stamp, JSON_EXT));

        Self::write_new(&path, &backup).await?;
        tracing::info!(
            service = service_name,
            record_id = record.id,
            path = %path.display(),
            "initial backup written"
        );
        Ok(path)
    }

    async fn list_backups(&self, service_name: &str) -> Result<Vec<BackupRecord>, ArchiveError> {
        let mut backups = Vec::new();
        for name in Self::file_names(&self.backup_dir).await? {
            if !name.starts_with(service_name) || !name.ends_with(JSON_EXT) {
                continue;
            }
            let path = self.backup_dir.join(&name);
            match Self::read_json::<BackupRecord>(&path).await {
                Ok(b) if b.service_name == service_name => backups.push(b),
                Ok(_) => {}
                Err(e) => tracing::warn!("skipping unreadable backup: {}", e),
            }
        }
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(backups)
    }

    async fn create_snapshot(
        &self,
        description: &str,
        targets: BTreeMap<String, SnapshotTarget>,
    ) -> Result<u64, ArchiveError> {
        let id = self.snapshot_ids().await?.last().map_or(1, |max| max + 1);
        let snapshot = Snapshot {
            id,
            timestamp: Utc::now(),
            description: description.to_string(),
            services: targets,
        };
        Self::write_new(&self.snapshot_path(id), &snapshot).await?;
        tracing::info!(
            id,
            services = snapshot.services.len(),
            description,
            "snapshot created"
        );
        Ok(id)
    }

    async fn load_snapshot(&self, id: u64) -> Result<Snapshot, ArchiveError> {
        let path = self.snapshot_path(id);
        let body = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ArchiveError::SnapshotNotFound(id));
            }
            Err(e) => return Err(Self::io_err(&path)(e)),
        };
        serde_json::from_slice(&body).map_err(|source| ArchiveError::Serde { path, source })
    }

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>, ArchiveError> {
        let mut snapshots = Vec::new();
        for id in self.snapshot_ids().await? {
            snapshots.push(self.load_snapshot(id).await?);
        }
        Ok(snapshots)
    }

    async fn delete_snapshot(&self, id: u64) -> Result<bool, ArchiveError> {
        let path = self.snapshot_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(id, "snapshot deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_err(&path)(e)),
        }
    }
}
