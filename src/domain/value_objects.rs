//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared between service tasks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheme the proxy uses when forwarding to an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    /// Parse a scheme as stored in the proxy's record store.
    ///
    /// # Examples
    /// ```
    /// use upstream_failover::domain::value_objects::Scheme;
    ///
    /// assert_eq!(Scheme::parse("HTTPS"), Some(Scheme::Https));
    /// assert_eq!(Scheme::parse("ftp"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a monitored service after a completed (retry-exhausted) probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("HEALTHY"),
            Self::Unhealthy => f.write_str("UNHEALTHY"),
        }
    }
}

/// Classification of a single failed probe attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeErrorKind {
    #[error("connection refused")]
    Refused,
    #[error("timeout")]
    Timeout,
    #[error("dns lookup failed")]
    DnsNotFound,
    #[error("unexpected http status {0}")]
    HttpStatus(u16),
    #[error("{0}")]
    Other(String),
}

impl ProbeErrorKind {
    /// Short stable label used in log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Refused => "refused",
            Self::Timeout => "timeout",
            Self::DnsNotFound => "dns-not-found",
            Self::HttpStatus(_) => "http-status",
            Self::Other(_) => "other",
        }
    }
}
