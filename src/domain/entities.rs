//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the failover domain:
//! what a service wants, what the proxy currently routes to, and what
//! the orchestrator believes is live.

use crate::domain::value_objects::{HealthState, ProbeErrorKind, Scheme};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Default number of probe attempts when a service does not configure one.
pub const DEFAULT_RETRIES: u32 = 3;

/// The (host, port, scheme) tuple a proxied domain forwards requests to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
}

impl UpstreamTarget {
    pub fn new(host: impl Into<String>, port: u16, scheme: Scheme) -> Self {
        Self {
            host: host.into(),
            port,
            scheme,
        }
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// A target as written in the services file. The scheme may be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub scheme: Option<Scheme>,
}

impl TargetSpec {
    /// Resolve into a concrete target, using `fallback_scheme` when none was configured.
    pub fn resolve(&self, fallback_scheme: Scheme) -> UpstreamTarget {
        UpstreamTarget::new(
            self.host.clone(),
            self.port,
            self.scheme.unwrap_or(fallback_scheme),
        )
    }
}

/// One monitored service, exactly one per proxied domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service name (the key of its table in the services file)
    #[serde(skip)]
    pub name: String,
    /// Proxied domain whose record gets repointed
    pub domain: String,
    /// Health check URL
    pub check: String,
    /// Seconds between cycles while healthy
    pub interval: u64,
    /// Seconds between cycles while unhealthy
    pub error_delay: u64,
    /// Probe attempts per cycle
    #[serde(default)]
    pub retries: Option<u32>,
    /// Explicit target while healthy; the captured original is used when absent
    #[serde(default)]
    pub if_success: Option<TargetSpec>,
    /// Target while unhealthy
    pub if_failed: TargetSpec,
}

impl ServiceSpec {
    pub fn healthy_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn error_delay(&self) -> Duration {
        Duration::from_secs(self.error_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.unwrap_or(DEFAULT_RETRIES)
    }
}

/// A row of the reverse proxy's routing table.
///
/// Owned by the proxy's own administration; the orchestrator only rewrites
/// the forward host, port and scheme of an existing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub id: i64,
    pub domain_names: Vec<String>,
    pub forward_host: String,
    pub forward_port: u16,
    pub forward_scheme: Scheme,
    pub enabled: bool,
}

impl ProxyRecord {
    /// The upstream this record currently forwards to.
    pub fn target(&self) -> UpstreamTarget {
        UpstreamTarget::new(
            self.forward_host.clone(),
            self.forward_port,
            self.forward_scheme,
        )
    }

    pub fn matches_domain(&self, domain: &str) -> bool {
        self.domain_names
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain))
    }
}

/// Outcome of a bounded, retried health probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub success: bool,
    /// Duration of the last attempt
    pub response_time_ms: u64,
    /// Last classified error, `None` on success
    pub error: Option<ProbeErrorKind>,
    pub attempts: u32,
}

impl ProbeReport {
    pub fn healthy(response_time_ms: u64, attempts: u32) -> Self {
        Self {
            success: true,
            response_time_ms,
            error: None,
            attempts,
        }
    }

    pub fn unhealthy(error: ProbeErrorKind, response_time_ms: u64, attempts: u32) -> Self {
        Self {
            success: false,
            response_time_ms,
            error: Some(error),
            attempts,
        }
    }
}

/// In-memory state owned by a single service task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceRuntimeState {
    /// `None` until the first probe completes
    pub health: Option<HealthState>,
    pub last_probe: Option<DateTime<Utc>>,
    pub last_response_ms: Option<u64>,
    pub consecutive_failures: u32,
    /// Target captured from the record before any mutation
    pub original: Option<UpstreamTarget>,
    /// Last target written to both the config file and the record
    pub applied: Option<UpstreamTarget>,
    /// What the config file holds when a failed update left it out of step
    /// with `applied`
    pub file_drift: Option<UpstreamTarget>,
}

impl ServiceRuntimeState {
    /// Fold a completed probe into the state. Returns the previous health.
    pub fn record_probe(&mut self, report: &ProbeReport) -> Option<HealthState> {
        let previous = self.health;
        if report.success {
            self.health = Some(HealthState::Healthy);
            self.consecutive_failures = 0;
        } else {
            self.health = Some(HealthState::Unhealthy);
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
        self.last_probe = Some(Utc::now());
        self.last_response_ms = Some(report.response_time_ms);
        previous
    }

    /// Delay before the next cycle: healthy interval, otherwise the error delay.
    pub fn next_delay(&self, spec: &ServiceSpec) -> Duration {
        match self.health {
            Some(HealthState::Healthy) => spec.healthy_interval(),
            _ => spec.error_delay(),
        }
    }

    /// Whether `desired` differs from the applied target in host, port or
    /// scheme. A drifted config file always needs an update.
    pub fn needs_update(&self, desired: &UpstreamTarget) -> bool {
        if self.file_drift.is_some() {
            return true;
        }
        match &self.applied {
            Some(applied) => {
                applied.host != desired.host
                    || applied.port != desired.port
                    || applied.scheme != desired.scheme
            }
            None => true,
        }
    }
}

/// Metadata attached to an automatic backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub backup_type: String,
    pub description: String,
}

/// Write-once capture of a record taken before the first mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
    pub proxy_host: ProxyRecord,
    pub metadata: BackupMetadata,
}

impl BackupRecord {
    pub fn initial(service_name: &str, record: &ProxyRecord) -> Self {
        Self {
            timestamp: Utc::now(),
            service_name: service_name.to_string(),
            proxy_host: record.clone(),
            metadata: BackupMetadata {
                backup_type: "initial".to_string(),
                description: format!("original state of {} before failover", service_name),
            },
        }
    }
}

/// One service's entry inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTarget {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    pub domain: String,
}

impl SnapshotTarget {
    pub fn new(domain: impl Into<String>, target: &UpstreamTarget) -> Self {
        Self {
            host: target.host.clone(),
            port: target.port,
            scheme: target.scheme,
            domain: domain.into(),
        }
    }

    pub fn target(&self) -> UpstreamTarget {
        UpstreamTarget::new(self.host.clone(), self.port, self.scheme)
    }
}

/// Explicit, numbered capture of all services' targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub services: BTreeMap<String, SnapshotTarget>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "sso".to_string(),
            domain: "sso.example.com".to_string(),
            check: "http://10.0.0.1:8000/health".to_string(),
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

    fn record() -> ProxyRecord {
        ProxyRecord {
            id: 7,
            domain_names: vec!["sso.example.com".to_string(), "auth.example.com".to_string()],
            forward_host: "10.0.0.1".to_string(),
            forward_port: 8000,
            forward_scheme: Scheme::Http,
            enabled: true,
        }
    }

    fn applied_state() -> ServiceRuntimeState {
        ServiceRuntimeState {
            original: Some(record().target()),
            applied: Some(record().target()),
            ..Default::default()
        }
    }

    #[test]
    fn test_target_display() {
        let t = UpstreamTarget::new("10.0.0.1", 8080, Scheme::Https);
        assert_eq!(t.to_string(), "https://10.0.0.1:8080");
    }

    #[test]
    fn test_target_spec_resolve_uses_fallback_scheme() {
        let spec = TargetSpec {
            host: "b".to_string(),
            port: 1,
            scheme: None,
        };
        assert_eq!(spec.resolve(Scheme::Https).scheme, Scheme::Https);

        let explicit = TargetSpec {
            scheme: Some(Scheme::Http),
            ..spec
        };
        assert_eq!(explicit.resolve(Scheme::Https).scheme, Scheme::Http);
    }

    #[test]
    fn test_max_attempts_default() {
        assert_eq!(spec().max_attempts(), 3);
        let custom = ServiceSpec {
            retries: Some(5),
            ..spec()
        };
        assert_eq!(custom.max_attempts(), 5);
    }

    #[test]
    fn test_record_matches_domain_case_insensitive() {
        let r = record();
        assert!(r.matches_domain("sso.example.com"));
        assert!(r.matches_domain("AUTH.example.com"));
        assert!(!r.matches_domain("other.example.com"));
    }

    #[test]
    fn test_record_probe_success_resets_failures() {
        let mut state = ServiceRuntimeState {
            consecutive_failures: 4,
            ..Default::default()
        };
        let previous = state.record_probe(&ProbeReport::healthy(12, 1));
        assert_eq!(previous, None);
        assert_eq!(state.health, Some(HealthState::Healthy));
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_response_ms, Some(12));
        assert!(state.last_probe.is_some());
    }

    #[test]
    fn test_record_probe_failure_increments_by_one() {
        let mut state = ServiceRuntimeState::default();
        for expected in 1..=3 {
            state.record_probe(&ProbeReport::unhealthy(ProbeErrorKind::Refused, 1, 3));
            assert_eq!(state.consecutive_failures, expected);
        }
        assert_eq!(state.health, Some(HealthState::Unhealthy));
    }

    #[test]
    fn test_next_delay_follows_health() {
        let spec = spec();
        let mut state = ServiceRuntimeState::default();
        assert_eq!(state.next_delay(&spec), Duration::from_secs(5));

        state.record_probe(&ProbeReport::healthy(1, 1));
        assert_eq!(state.next_delay(&spec), Duration::from_secs(30));

        state.record_probe(&ProbeReport::unhealthy(ProbeErrorKind::Timeout, 1, 3));
        assert_eq!(state.next_delay(&spec), Duration::from_secs(5));
    }

    #[test]
    fn test_needs_update_field_by_field() {
        let state = applied_state();
        let same = record().target();
        assert!(!state.needs_update(&same));

        let mut other_host = same.clone();
        other_host.host = "10.0.0.9".to_string();
        assert!(state.needs_update(&other_host));

        let mut other_port = same.clone();
        other_port.port = 9000;
        assert!(state.needs_update(&other_port));

        let mut other_scheme = same;
        other_scheme.scheme = Scheme::Https;
        assert!(state.needs_update(&other_scheme));

        assert!(ServiceRuntimeState::default().needs_update(&record().target()));
    }

    #[test]
    fn test_needs_update_when_file_drifted() {
        let mut state = applied_state();
        state.file_drift = Some(UpstreamTarget::new("10.0.0.2", 8000, Scheme::Http));
        assert!(state.needs_update(&record().target()));
    }

    #[test]
    fn test_backup_record_json_shape() {
        let backup = BackupRecord::initial("sso", &record());
        let value = serde_json::to_value(&backup).unwrap();
        assert_eq!(value["serviceName"], "sso");
        assert_eq!(value["proxyHost"]["forward_host"], "10.0.0.1");
        assert_eq!(value["proxyHost"]["forward_scheme"], "http");
        assert_eq!(value["metadata"]["backupType"], "initial");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_service_spec_from_toml() {
        let spec: ServiceSpec = toml::from_str(
            r#"
            domain = "sso.example.com"
            check = "http://10.0.0.1:8000/health"
            interval = 30
            error_delay = 5
            if_failed = { host = "10.0.0.2", port = 8000 }
            if_success = { host = "10.0.0.1", port = 8443, scheme = "https" }
            "#,
        )
        .unwrap();
        assert_eq!(spec.retries, None);
        assert_eq!(spec.if_failed.scheme, None);
        assert_eq!(spec.if_success.unwrap().scheme, Some(Scheme::Https));
    }
}
