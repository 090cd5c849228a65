//! Snapshot Service
//!
//! Offline snapshot capture and restore, driven from the CLI while no
//! monitor is running. Works from persisted records rather than in-memory
//! applied targets.

use crate::domain::entities::{ServiceSpec, SnapshotTarget};
use crate::domain::ports::{ArchiveError, ConfigSynchronizer, RecordStore, SnapshotArchive};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of restoring a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub reloaded: bool,
}

pub struct SnapshotService {
    store: Arc<dyn RecordStore>,
    sync: Arc<dyn ConfigSynchronizer>,
    archive: Arc<dyn SnapshotArchive>,
}

impl SnapshotService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        sync: Arc<dyn ConfigSynchronizer>,
        archive: Arc<dyn SnapshotArchive>,
    ) -> Self {
        Self {
            store,
            sync,
            archive,
        }
    }

    /// Snapshot each configured service's current record target.
    ///
    /// Services whose record is missing or unreadable are left out.
    pub async fn capture(
        &self,
        services: &[ServiceSpec],
        description: &str,
    ) -> Result<u64, ArchiveError> {
        let mut targets = BTreeMap::new();
        for spec in services {
            match self.store.find_by_domain(&spec.domain).await {
                Ok(Some(record)) => {
                    targets.insert(
                        spec.name.clone(),
                        SnapshotTarget::new(spec.domain.clone(), &record.target()),
                    );
                }
                Ok(None) => {
                    tracing::warn!(service = %spec.name, domain = %spec.domain, "no proxy record, not in snapshot");
                }
                Err(e) => {
                    tracing::error!(service = %spec.name, "record lookup failed, not in snapshot: {}", e);
                }
            }
        }

        let id = self.archive.create_snapshot(description, targets).await?;
        tracing::info!(snapshot = id, "snapshot created");
        Ok(id)
    }

    /// Point every service in snapshot `id` back at its captured target.
    ///
    /// Per-service failures are counted and do not stop the rest. The proxy
    /// is reloaded once at the end if anything changed.
    pub async fn restore(&self, id: u64) -> Result<RestoreReport, ArchiveError> {
        let snapshot = self.archive.load_snapshot(id).await?;
        let mut report = RestoreReport::default();

        for (name, entry) in &snapshot.services {
            let record = match self.store.find_by_domain(&entry.domain).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::warn!(service = %name, domain = %entry.domain, "no proxy record, cannot restore");
                    report.failed += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(service = %name, "record lookup failed: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            let current = record.target();
            let wanted = entry.target();
            if current == wanted {
                report.unchanged += 1;
                continue;
            }

            if let Err(e) = self.sync.patch(record.id, &current, &wanted).await {
                tracing::error!(service = %name, record_id = record.id, "config patch failed: {}", e);
                report.failed += 1;
                continue;
            }
            if let Err(e) = self
                .store
                .update(record.id, &wanted.host, wanted.port, Some(wanted.scheme))
                .await
            {
                tracing::error!(service = %name, record_id = record.id, "record update failed: {}", e);
                report.failed += 1;
                continue;
            }

            tracing::info!(service = %name, "restored {} -> {}", current, wanted);
            report.restored += 1;
        }

        if report.restored > 0 {
            match self.sync.reload().await {
                Ok(()) => report.reloaded = true,
                Err(e) => tracing::error!("proxy reload after restore failed: {}", e),
            }
        }

        tracing::info!(
            snapshot = id,
            restored = report.restored,
            unchanged = report.unchanged,
            failed = report.failed,
            "restore complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::*;
    use crate::domain::entities::UpstreamTarget;
    use crate::domain::value_objects::Scheme;
    use std::sync::atomic::Ordering;

    struct Fixture {
        store: Arc<MemoryRecordStore>,
        sync: Arc<RecordingSync>,
        archive: Arc<MemoryArchive>,
        service: SnapshotService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryRecordStore::with(vec![
            record(1, "sso.example.com", "10.0.0.1", 8000),
            record(2, "api.example.com", "10.0.1.1", 443),
        ]));
        let sync = Arc::new(
            RecordingSync::default()
                .with_file(1, UpstreamTarget::new("10.0.0.1", 8000, Scheme::Http))
                .with_file(2, UpstreamTarget::new("10.0.1.1", 443, Scheme::Http)),
        );
        let archive = Arc::new(MemoryArchive::default());
        let service = SnapshotService::new(store.clone(), sync.clone(), archive.clone());
        Fixture {
            store,
            sync,
            archive,
            service,
        }
    }

    fn services() -> Vec<ServiceSpec> {
        vec![
            service("api", "api.example.com"),
            service("sso", "sso.example.com"),
        ]
    }

    #[tokio::test]
    async fn test_capture_uses_record_targets() {
        let f = fixture();
        let id = f.service.capture(&services(), "before upgrade").await.unwrap();
        assert_eq!(id, 1);

        let snapshot = f.archive.load_snapshot(id).await.unwrap();
        assert_eq!(snapshot.description, "before upgrade");
        assert_eq!(snapshot.services.len(), 2);
        assert_eq!(snapshot.services["api"].port, 443);
    }

    #[tokio::test]
    async fn test_capture_skips_missing_records() {
        let f = fixture();
        f.store.remove(2);
        let id = f.service.capture(&services(), "partial").await.unwrap();
        let snapshot = f.archive.load_snapshot(id).await.unwrap();
        assert_eq!(snapshot.services.keys().collect::<Vec<_>>(), vec!["sso"]);
    }

    #[tokio::test]
    async fn test_restore_reverts_changed_services_and_reloads_once() {
        let f = fixture();
        let id = f.service.capture(&services(), "baseline").await.unwrap();

        // sso failed over after the snapshot
        let fallback = UpstreamTarget::new("10.0.0.2", 8000, Scheme::Http);
        let original = UpstreamTarget::new("10.0.0.1", 8000, Scheme::Http);
        f.sync.patch(1, &original, &fallback).await.unwrap();
        f.store.update(1, "10.0.0.2", 8000, None).await.unwrap();

        let report = f.service.restore(id).await.unwrap();
        assert_eq!(
            report,
            RestoreReport {
                restored: 1,
                unchanged: 1,
                failed: 0,
                reloaded: true,
            }
        );
        assert_eq!(f.store.get(1).unwrap().target(), original);
        assert_eq!(f.sync.file(1), Some(original));
        assert_eq!(f.sync.reload_count(), 1);
    }

    #[tokio::test]
    async fn test_restore_with_nothing_to_do_skips_reload() {
        let f = fixture();
        let id = f.service.capture(&services(), "baseline").await.unwrap();
        let report = f.service.restore(id).await.unwrap();
        assert_eq!(report.unchanged, 2);
        assert!(!report.reloaded);
        assert_eq!(f.sync.reload_count(), 0);
    }

    #[tokio::test]
    async fn test_restore_counts_failures_and_continues() {
        let f = fixture();
        let id = f.service.capture(&services(), "baseline").await.unwrap();
        f.store.update(1, "10.0.0.2", 8000, None).await.unwrap();
        f.store.update(2, "10.0.1.2", 443, None).await.unwrap();
        f.store.remove(2);
        f.sync.mark_missing(1);

        let report = f.service.restore(id).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.restored, 0);
        assert!(!report.reloaded);
    }

    #[tokio::test]
    async fn test_restore_reports_reload_failure() {
        let f = fixture();
        let id = f.service.capture(&services(), "baseline").await.unwrap();
        f.store.update(2, "10.0.1.2", 443, None).await.unwrap();
        f.sync.fail_reload.store(true, Ordering::SeqCst);

        let report = f.service.restore(id).await.unwrap();
        assert_eq!(report.restored, 1);
        assert!(!report.reloaded);
    }

    #[tokio::test]
    async fn test_restore_unknown_snapshot() {
        let f = fixture();
        let err = f.service.restore(42).await.unwrap_err();
        assert!(matches!(err, ArchiveError::SnapshotNotFound(42)));
    }
}
