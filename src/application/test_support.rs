//! In-process doubles for the domain ports, shared by application tests.

use crate::domain::entities::{
    BackupRecord, ProbeReport, ProxyRecord, ServiceSpec, Snapshot, SnapshotTarget, TargetSpec,
    UpstreamTarget,
};
use crate::domain::ports::{
    ArchiveError, ConfigSynchronizer, FileSyncError, HealthProbe, PatchReport, ProcessError,
    RecordStore, SnapshotArchive, StoreError,
};
use crate::domain::value_objects::{ProbeErrorKind, Scheme};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn service(name: &str, domain: &str) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        domain: domain.to_string(),
        check: format!("http://{}/health", domain),
        interval: 30,
        error_delay: 5,
        retries: None,
        if_success: None,
        if_failed: TargetSpec {
            host: "10.0.0.2".to_string(),
            port: 8000,
            scheme: None,
        },
    }
}

pub fn record(id: i64, domain: &str, host: &str, port: u16) -> ProxyRecord {
    ProxyRecord {
        id,
        domain_names: vec![domain.to_string()],
        forward_host: host.to_string(),
        forward_port: port,
        forward_scheme: Scheme::Http,
        enabled: true,
    }
}

pub fn refused(attempts: u32) -> ProbeReport {
    ProbeReport::unhealthy(ProbeErrorKind::Refused, 1, attempts)
}

// ===== RecordStore =====

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<ProxyRecord>>,
    pub fail_lookups: AtomicBool,
    pub fail_updates: AtomicBool,
    pub updates: AtomicUsize,
    pub closed: AtomicBool,
}

impl MemoryRecordStore {
    pub fn with(records: Vec<ProxyRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn get(&self, id: i64) -> Option<ProxyRecord> {
        self.records.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }

    pub fn remove(&self, id: i64) {
        self.records.lock().unwrap().retain(|r| r.id != id);
    }

    pub fn insert(&self, record: ProxyRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_by_domain(&self, domain: &str) -> Result<Option<ProxyRecord>, StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("database is locked".to_string()));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.matches_domain(domain))
            .cloned())
    }

    async fn update(
        &self,
        id: i64,
        host: &str,
        port: u16,
        scheme: Option<Scheme>,
    ) -> Result<usize, StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Query("disk I/O error".to_string()));
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.forward_host = host.to_string();
                r.forward_port = port;
                if let Some(s) = scheme {
                    r.forward_scheme = s;
                }
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ===== ConfigSynchronizer =====

/// Keeps "files" as in-memory targets keyed by record id.
#[derive(Default)]
pub struct RecordingSync {
    files: Mutex<BTreeMap<i64, UpstreamTarget>>,
    missing: Mutex<HashSet<i64>>,
    pub fail_reload: AtomicBool,
    /// Patches beyond this many in total fail with an io error
    pub patch_limit: Mutex<Option<usize>>,
    pub patches: Mutex<Vec<(i64, UpstreamTarget, UpstreamTarget)>>,
    pub reloads: AtomicUsize,
}

impl RecordingSync {
    pub fn with_file(self, id: i64, target: UpstreamTarget) -> Self {
        self.files.lock().unwrap().insert(id, target);
        self
    }

    pub fn mark_missing(&self, id: i64) {
        self.missing.lock().unwrap().insert(id);
    }

    pub fn file(&self, id: i64) -> Option<UpstreamTarget> {
        self.files.lock().unwrap().get(&id).cloned()
    }

    pub fn patch_count(&self) -> usize {
        self.patches.lock().unwrap().len()
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigSynchronizer for RecordingSync {
    async fn patch(
        &self,
        record_id: i64,
        old: &UpstreamTarget,
        new: &UpstreamTarget,
    ) -> Result<PatchReport, FileSyncError> {
        let path = PathBuf::from(format!("/conf/{}.conf", record_id));
        if self.missing.lock().unwrap().contains(&record_id) {
            return Err(FileSyncError::Missing(path));
        }
        let limit = *self.patch_limit.lock().unwrap();
        if limit.is_some_and(|n| self.patch_count() >= n) {
            return Err(FileSyncError::Io {
                path,
                source: std::io::Error::new(std::io::ErrorKind::Other, "read-only file system"),
            });
        }
        self.patches
            .lock()
            .unwrap()
            .push((record_id, old.clone(), new.clone()));

        let mut files = self.files.lock().unwrap();
        let current = files.get(&record_id).cloned();
        let replacements = match current {
            Some(ref c) if c == old => {
                files.insert(record_id, new.clone());
                2
            }
            _ => 0,
        };
        Ok(PatchReport {
            path,
            backup_path: PathBuf::from(format!("/backups/{}.conf.bak", record_id)),
            replacements,
        })
    }

    async fn reload(&self) -> Result<(), ProcessError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(ProcessError::NonZeroExit {
                command: "nginx -s reload".to_string(),
                code: 1,
            });
        }
        Ok(())
    }

    async fn test_syntax(&self) -> Result<(), ProcessError> {
        Ok(())
    }
}

// ===== HealthProbe =====

/// Replays queued reports, then repeats `fallback`.
pub struct ScriptedProbe {
    queue: Mutex<VecDeque<ProbeReport>>,
    fallback: Mutex<ProbeReport>,
    delay: Duration,
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(fallback: ProbeReport) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push(&self, report: ProbeReport) {
        self.queue.lock().unwrap().push_back(report);
    }

    pub fn set_fallback(&self, report: ProbeReport) {
        *self.fallback.lock().unwrap() = report;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, _url: &str, _max_attempts: u32) -> ProbeReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        let next = self.queue.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

// ===== SnapshotArchive =====

#[derive(Default)]
pub struct MemoryArchive {
    pub backups: Mutex<Vec<BackupRecord>>,
    snapshots: Mutex<BTreeMap<u64, Snapshot>>,
    pub fail_backups: AtomicBool,
}

impl MemoryArchive {
    pub fn backup_count(&self) -> usize {
        self.backups.lock().unwrap().len()
    }
}

#[async_trait]
impl SnapshotArchive for MemoryArchive {
    async fn backup_initial(
        &self,
        service_name: &str,
        record: &ProxyRecord,
    ) -> Result<PathBuf, ArchiveError> {
        let path = PathBuf::from(format!("/backups/{}.json", service_name));
        if self.fail_backups.load(Ordering::SeqCst) {
            return Err(ArchiveError::Io {
                path,
                source: std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"),
            });
        }
        self.backups
            .lock()
            .unwrap()
            .push(BackupRecord::initial(service_name, record));
        Ok(path)
    }

    async fn list_backups(&self, service_name: &str) -> Result<Vec<BackupRecord>, ArchiveError> {
        Ok(self
            .backups
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.service_name == service_name)
            .cloned()
            .collect())
    }

    async fn create_snapshot(
        &self,
        description: &str,
        targets: BTreeMap<String, SnapshotTarget>,
    ) -> Result<u64, ArchiveError> {
        let mut snapshots = self.snapshots.lock().unwrap();
        let id = snapshots.keys().next_back().map_or(1, |max| max + 1);
        snapshots.insert(
            id,
            Snapshot {
                id,
                timestamp: Utc::now(),
                description: description.to_string(),
                services: targets,
            },
        );
        Ok(id)
    }

    async fn load_snapshot(&self, id: u64) -> Result<Snapshot, ArchiveError> {
        self.snapshots
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(ArchiveError::SnapshotNotFound(id))
    }

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>, ArchiveError> {
        Ok(self.snapshots.lock().unwrap().values().cloned().collect())
    }

    async fn delete_snapshot(&self, id: u64) -> Result<bool, ArchiveError> {
        Ok(self.snapshots.lock().unwrap().remove(&id).is_some())
    }
}
