//! Failover Service - Main application use case
//!
//! Runs one self-paced monitor task per service. Each cycle probes the
//! service, picks the upstream it should point at and, when that differs
//! from what is applied, pushes the change through the update protocol:
//!
//! 1. locate the proxy record by domain
//! 2. patch the proxy config file (abort on failure)
//! 3. update the record (on failure, roll the patch back and abort)
//! 4. reload the proxy (failure is logged, the switch still counts)
//! 5. remember the new applied target
//!
//! Monitors own their runtime state outright. The orchestrator only sees it
//! through the `watch` channel each monitor publishes to.

use crate::domain::entities::{
    ProxyRecord, ServiceRuntimeState, ServiceSpec, SnapshotTarget, UpstreamTarget,
};
use crate::domain::ports::{
    ArchiveError, ConfigSynchronizer, HealthProbe, RecordStore, SnapshotArchive,
};
use crate::domain::services::TargetSelector;
use crate::domain::value_objects::HealthState;
use crate::infrastructure::shutdown::ShutdownController;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Why an update cycle stopped before switching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    RecordNotFound,
    Store(String),
    Backup(String),
    FileSync(String),
    RecordWrite(String),
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Desired target already applied, nothing written
    Unchanged,
    /// Healthy but no success target is known
    NoTarget,
    Switched {
        from: Option<UpstreamTarget>,
        to: UpstreamTarget,
        reloaded: bool,
    },
    Aborted(AbortReason),
}

/// Read-only view of a monitor's state.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    pub name: String,
    pub domain: String,
    pub health: Option<HealthState>,
    pub consecutive_failures: u32,
    pub last_probe: Option<DateTime<Utc>>,
    pub last_response_ms: Option<u64>,
    pub applied: Option<UpstreamTarget>,
}

impl ServiceStatus {
    fn from_state(spec: &ServiceSpec, state: &ServiceRuntimeState) -> Self {
        Self {
            name: spec.name.clone(),
            domain: spec.domain.clone(),
            health: state.health,
            consecutive_failures: state.consecutive_failures,
            last_probe: state.last_probe,
            last_response_ms: state.last_response_ms,
            applied: state.applied.clone(),
        }
    }
}

/// Per-service monitor. Owns its runtime state exclusively.
pub struct ServiceMonitor {
    spec: ServiceSpec,
    state: ServiceRuntimeState,
    backed_up: bool,
    store: Arc<dyn RecordStore>,
    sync: Arc<dyn ConfigSynchronizer>,
    probe: Arc<dyn HealthProbe>,
    archive: Arc<dyn SnapshotArchive>,
    status_tx: watch::Sender<ServiceStatus>,
}

impl ServiceMonitor {
    pub fn new(
        spec: ServiceSpec,
        store: Arc<dyn RecordStore>,
        sync: Arc<dyn ConfigSynchronizer>,
        probe: Arc<dyn HealthProbe>,
        archive: Arc<dyn SnapshotArchive>,
    ) -> Self {
        let state = ServiceRuntimeState::default();
        let (status_tx, _) = watch::channel(ServiceStatus::from_state(&spec, &state));
        Self {
            spec,
            state,
            backed_up: false,
            store,
            sync,
            probe,
            archive,
            status_tx,
        }
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn state(&self) -> &ServiceRuntimeState {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceStatus> {
        self.status_tx.subscribe()
    }

    fn publish(&self) {
        self.status_tx
            .send_replace(ServiceStatus::from_state(&self.spec, &self.state));
    }

    /// Capture the original target and write the initial backup.
    ///
    /// A missing record or an unreachable store is not fatal: the capture is
    /// retried by the first cycle that needs to mutate the record.
    pub async fn initialize(&mut self) {
        match self.store.find_by_domain(&self.spec.domain).await {
            Ok(Some(record)) => {
                if let Err(reason) = self.capture_original(&record).await {
                    tracing::error!(
                        service = %self.spec.name,
                        "initial backup failed, will retry before first switch: {:?}",
                        reason
                    );
                }
            }
            Ok(None) => {
                tracing::warn!(
                    service = %self.spec.name,
                    domain = %self.spec.domain,
                    "no proxy record for domain, service cannot be switched until one exists"
                );
            }
            Err(e) => {
                tracing::error!(service = %self.spec.name, "record lookup failed: {}", e);
            }
        }
        self.publish();
    }

    /// Snapshot the record as the original target and back it up once.
    async fn capture_original(&mut self, record: &ProxyRecord) -> Result<(), AbortReason> {
        if self.state.original.is_none() {
            let target = record.target();
            tracing::info!(
                service = %self.spec.name,
                record_id = record.id,
                original = %target,
                "captured original target"
            );
            self.state.original = Some(target.clone());
            if self.state.applied.is_none() {
                self.state.applied = Some(target);
            }
        }

        if !self.backed_up {
            self.archive
                .backup_initial(&self.spec.name, record)
                .await
                .map_err(|e| AbortReason::Backup(e.to_string()))?;
            self.backed_up = true;
        }
        Ok(())
    }

    /// Run one probe-decide-apply cycle.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let report = self
            .probe
            .probe(&self.spec.check, self.spec.max_attempts())
            .await;
        let previous = self.state.record_probe(&report);
        let current = self.state.health;

        match (&report.error, previous != current) {
            (None, true) => tracing::info!(
                service = %self.spec.name,
                attempts = report.attempts,
                response_ms = report.response_time_ms,
                "service is HEALTHY"
            ),
            (Some(kind), true) => tracing::warn!(
                service = %self.spec.name,
                attempts = report.attempts,
                consecutive_failures = self.state.consecutive_failures,
                kind = kind.label(),
                "service is UNHEALTHY: {}",
                kind
            ),
            (Some(kind), false) => tracing::debug!(
                service = %self.spec.name,
                consecutive_failures = self.state.consecutive_failures,
                "still unhealthy: {}",
                kind
            ),
            (None, false) => tracing::debug!(
                service = %self.spec.name,
                response_ms = report.response_time_ms,
                "still healthy"
            ),
        }

        let outcome = match TargetSelector::desired_target(&self.spec, &self.state, report.success)
        {
            None => {
                tracing::warn!(
                    service = %self.spec.name,
                    "healthy but no success target or original target known, skipping"
                );
                CycleOutcome::NoTarget
            }
            Some(desired) if !self.state.needs_update(&desired) => CycleOutcome::Unchanged,
            Some(desired) => self.apply(desired).await,
        };

        self.publish();
        outcome
    }

    /// Drive the update protocol towards `desired`.
    async fn apply(&mut self, desired: UpstreamTarget) -> CycleOutcome {
        let name = self.spec.name.clone();

        let record = match self.store.find_by_domain(&self.spec.domain).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(
                    service = %name,
                    domain = %self.spec.domain,
                    "no proxy record for domain, cannot switch"
                );
                return CycleOutcome::Aborted(AbortReason::RecordNotFound);
            }
            Err(e) => {
                tracing::error!(service = %name, "record lookup failed: {}", e);
                return CycleOutcome::Aborted(AbortReason::Store(e.to_string()));
            }
        };

        if let Err(reason) = self.capture_original(&record).await {
            tracing::error!(service = %name, "refusing to switch without a backup: {:?}", reason);
            return CycleOutcome::Aborted(reason);
        }

        let current = self
            .state
            .file_drift
            .clone()
            .or_else(|| self.state.applied.clone())
            .unwrap_or_else(|| record.target());

        if let Err(e) = self.sync.patch(record.id, &current, &desired).await {
            tracing::error!(
                service = %name,
                record_id = record.id,
                "config patch failed, will retry next cycle: {}",
                e
            );
            return CycleOutcome::Aborted(AbortReason::FileSync(e.to_string()));
        }

        match self
            .store
            .update(record.id, &desired.host, desired.port, Some(desired.scheme))
            .await
        {
            Ok(0) => tracing::warn!(
                service = %name,
                record_id = record.id,
                "record update matched no rows, id may be stale"
            ),
            Ok(_) => tracing::debug!(service = %name, record_id = record.id, "record updated"),
            Err(e) => {
                tracing::error!(
                    service = %name,
                    record_id = record.id,
                    "record update failed after config patch, rolling config back: {}",
                    e
                );
                self.roll_back(record.id, &desired, &current).await;
                return CycleOutcome::Aborted(AbortReason::RecordWrite(e.to_string()));
            }
        }
        self.state.file_drift = None;

        let reloaded = match self.sync.reload().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    service = %name,
                    "proxy reload failed, config and record updated but proxy serves stale routing: {}",
                    e
                );
                false
            }
        };

        let from = self.state.applied.replace(desired.clone());
        match &from {
            Some(old) => tracing::info!(service = %name, "switched {} -> {}", old, desired),
            None => tracing::info!(service = %name, "switched to {}", desired),
        }

        CycleOutcome::Switched {
            from,
            to: desired,
            reloaded,
        }
    }

    /// Put the config file back on `previous` after a failed record write.
    ///
    /// If that fails too, the file is left on `patched` and remembered as
    /// drifted so the next cycle rewrites it whatever target it wants.
    async fn roll_back(
        &mut self,
        record_id: i64,
        patched: &UpstreamTarget,
        previous: &UpstreamTarget,
    ) {
        match self.sync.patch(record_id, patched, previous).await {
            Ok(_) => {
                tracing::info!(
                    service = %self.spec.name,
                    record_id,
                    "config rolled back to {}",
                    previous
                );
                self.state.file_drift =
                    (self.state.applied.as_ref() != Some(previous)).then(|| previous.clone());
            }
            Err(e) => {
                tracing::error!(
                    service = %self.spec.name,
                    record_id,
                    "config rollback failed, file stays on {} until next cycle: {}",
                    patched,
                    e
                );
                self.state.file_drift = Some(patched.clone());
            }
        }
    }

    /// Self-paced schedule: wait, run a cycle, repeat until shutdown.
    ///
    /// The wait is the only cancellable point; a cycle in flight always
    /// completes.
    pub async fn run(mut self, shutdown: ShutdownController) {
        let token = shutdown.token();
        loop {
            let delay = self.state.next_delay(&self.spec);
            tracing::debug!(next_in_secs = delay.as_secs(), "cycle scheduled");

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            if token.is_cancelled() {
                break;
            }

            let _guard = shutdown.cycle_guard();
            self.run_cycle().await;
        }
        tracing::info!("monitor stopped");
    }
}

/// Owns all monitors until they are started.
pub struct FailoverOrchestrator {
    monitors: Vec<ServiceMonitor>,
    store: Arc<dyn RecordStore>,
    archive: Arc<dyn SnapshotArchive>,
}

impl FailoverOrchestrator {
    pub fn new(
        services: Vec<ServiceSpec>,
        store: Arc<dyn RecordStore>,
        sync: Arc<dyn ConfigSynchronizer>,
        probe: Arc<dyn HealthProbe>,
        archive: Arc<dyn SnapshotArchive>,
    ) -> Self {
        let monitors = services
            .into_iter()
            .map(|spec| {
                ServiceMonitor::new(
                    spec,
                    store.clone(),
                    sync.clone(),
                    probe.clone(),
                    archive.clone(),
                )
            })
            .collect();
        Self {
            monitors,
            store,
            archive,
        }
    }

    /// Capture originals and write one backup per service.
    pub async fn initialize(&mut self) {
        join_all(self.monitors.iter_mut().map(|m| {
            let span = tracing::info_span!("service", name = %m.spec.name);
            m.initialize().instrument(span)
        }))
        .await;
        tracing::info!(services = self.monitors.len(), "services initialized");
    }

    /// Probe every service at once and apply the results.
    ///
    /// Establishes each service's initial applied target before scheduled
    /// monitoring begins.
    pub async fn run_initial_probes(&mut self) -> Vec<(String, CycleOutcome)> {
        let outcomes = join_all(self.monitors.iter_mut().map(|m| {
            let span = tracing::info_span!("service", name = %m.spec.name);
            async move {
                let outcome = m.run_cycle().await;
                (m.spec.name.clone(), outcome)
            }
            .instrument(span)
        }))
        .await;

        let healthy = self
            .monitors
            .iter()
            .filter(|m| m.state.health.is_some_and(|h| h.is_healthy()))
            .count();
        tracing::info!(
            healthy,
            unhealthy = self.monitors.len() - healthy,
            "initial probes complete"
        );
        outcomes
    }

    /// Initialize, probe every service, then monitor until shutdown.
    ///
    /// A shutdown requested during startup lets the initial probes finish
    /// and skips scheduled monitoring.
    pub async fn run_until_shutdown(mut self, shutdown: ShutdownController) {
        self.initialize().await;
        self.run_initial_probes().await;

        if shutdown.is_shutdown() {
            tracing::info!("shutdown requested during startup, not starting monitors");
            self.store.close().await;
            return;
        }

        let handle = self.start(shutdown.clone());
        shutdown.token().cancelled().await;
        handle.stop().await;
    }

    /// Spawn one scheduled task per service.
    pub fn start(self, shutdown: ShutdownController) -> OrchestratorHandle {
        let mut statuses = Vec::with_capacity(self.monitors.len());
        let mut tasks = Vec::with_capacity(self.monitors.len());

        for monitor in self.monitors {
            statuses.push(monitor.subscribe());
            let span = tracing::info_span!("service", name = %monitor.spec.name);
            tasks.push(tokio::spawn(monitor.run(shutdown.clone()).instrument(span)));
        }

        tracing::info!(services = tasks.len(), "monitoring started");
        OrchestratorHandle {
            tasks,
            statuses,
            store: self.store,
            archive: self.archive,
            shutdown,
        }
    }
}

/// Handle to running monitors.
pub struct OrchestratorHandle {
    tasks: Vec<JoinHandle<()>>,
    statuses: Vec<watch::Receiver<ServiceStatus>>,
    store: Arc<dyn RecordStore>,
    archive: Arc<dyn SnapshotArchive>,
    shutdown: ShutdownController,
}

impl OrchestratorHandle {
    /// Latest published status of every service.
    pub fn statuses(&self) -> Vec<ServiceStatus> {
        self.statuses.iter().map(|rx| rx.borrow().clone()).collect()
    }

    /// Snapshot every service's applied target.
    ///
    /// For embedders holding a running handle. The CLI snapshots offline
    /// through `SnapshotService::capture` instead.
    pub async fn create_snapshot(&self, description: &str) -> Result<u64, ArchiveError> {
        let targets: BTreeMap<String, SnapshotTarget> = self
            .statuses()
            .into_iter()
            .filter_map(|s| {
                let target = s.applied.as_ref()?;
                Some((s.name.clone(), SnapshotTarget::new(s.domain.clone(), target)))
            })
            .collect();
        self.archive.create_snapshot(description, targets).await
    }

    /// Cancel pending timers, let in-flight cycles finish, close the store.
    pub async fn stop(self) {
        self.shutdown.shutdown();
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                tracing::error!("monitor task failed: {}", e);
            }
        }
        self.shutdown.wait_for_drain().await;
        self.store.close().await;
        tracing::info!("orchestrator stopped");
    }
}
