//! Application Layer
//!
//! Use cases that drive the domain ports: the failover monitors and
//! offline snapshot handling.

pub mod failover_service;
pub mod snapshot_service;

#[cfg(test)]
mod test_support;

pub use failover_service::{
    AbortReason, CycleOutcome, FailoverOrchestrator, OrchestratorHandle, ServiceMonitor,
    ServiceStatus,
};
pub use snapshot_service::{RestoreReport, SnapshotService};
