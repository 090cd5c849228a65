//! upstream-failover Library
//!
//! Watches backend services and repoints reverse-proxy upstreams at a
//! fallback target while they are down. Exposed as a library for the
//! binary and integration tests.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{FailoverOrchestrator, OrchestratorHandle, SnapshotService};
pub use config::{load_config, load_services, Config};
pub use domain::entities::{ServiceSpec, UpstreamTarget};
pub use domain::ports::{ConfigSynchronizer, HealthProbe, RecordStore, SnapshotArchive};
pub use domain::value_objects::{HealthState, Scheme};
