//! Active Health Checker
//!
//! Probes a service's check URL over HTTP with a bounded number of retries.
//! Every attempt builds its own client with pooling disabled so a stale
//! keep-alive socket never turns into a false failure.

use crate::domain::entities::ProbeReport;
use crate::domain::ports::HealthProbe;
use crate::domain::value_objects::ProbeErrorKind;
use async_trait::async_trait;
use std::error::Error as StdError;
use std::time::{Duration, Instant};

/// Lower and upper bound for probe attempts per cycle.
pub const MIN_ATTEMPTS: u32 = 1;
pub const MAX_ATTEMPTS: u32 = 10;

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Timeout for each probe
    pub timeout: Duration,
    /// Pause between a failed attempt and the next one
    pub retry_delay: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// HTTP health checker.
#[derive(Debug, Clone, Default)]
pub struct HealthChecker {
    config: HealthCheckConfig,
}

impl HealthChecker {
    /// Create a new health checker.
    pub fn new(config: HealthCheckConfig) -> Self {
        Self { config }
    }

    /// Clamp a configured attempt count into `1..=10`.
    pub fn clamp_attempts(max_attempts: u32) -> u32 {
        max_attempts.clamp(MIN_ATTEMPTS, MAX_ATTEMPTS)
    }

    /// One GET against `url`; 2xx is healthy.
    pub async fn check_once(&self, url: &str) -> Result<(), ProbeErrorKind> {
        let client = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| ProbeErrorKind::Other(format!("client error: {}", e)))?;

        match client
            .get(url)
            .header(reqwest::header::CONNECTION, "close")
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(ProbeErrorKind::HttpStatus(resp.status().as_u16())),
            Err(e) => Err(Self::classify(&e)),
        }
    }

    /// Map a transport error onto a probe error kind.
    fn classify(err: &reqwest::Error) -> ProbeErrorKind {
        if err.is_timeout() {
            return ProbeErrorKind::Timeout;
        }

        let mut source: Option<&(dyn StdError + 'static)> = err.source();
        let mut chain = err.to_string();
        while let Some(cause) = source {
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                match io.kind() {
                    std::io::ErrorKind::ConnectionRefused => return ProbeErrorKind::Refused,
                    std::io::ErrorKind::TimedOut => return ProbeErrorKind::Timeout,
                    _ => {}
                }
            }
            chain.push_str(": ");
            chain.push_str(&cause.to_string());
            source = cause.source();
        }

        let lower = chain.to_lowercase();
        if lower.contains("dns error")
            || lower.contains("failed to lookup address")
            || lower.contains("name or service not known")
            || lower.contains("no such host")
        {
            ProbeErrorKind::DnsNotFound
        } else if lower.contains("connection refused") {
            ProbeErrorKind::Refused
        } else {
            ProbeErrorKind::Other(chain)
        }
    }
}

#[async_trait]
impl HealthProbe for HealthChecker {
    async fn probe(&self, url: &str, max_attempts: u32) -> ProbeReport {
        let max_attempts = Self::clamp_attempts(max_attempts);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let start = Instant::now();
            let result = self.check_once(url).await;
            let latency = start.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    tracing::debug!(url, attempt, latency_ms = latency, "probe ok");
                    return ProbeReport::healthy(latency, attempt);
                }
                Err(kind) => {
                    tracing::debug!(
                        url,
                        attempt,
                        max_attempts,
                        kind = kind.label(),
                        "probe failed: {}",
                        kind
                    );
                    if attempt >= max_attempts {
                        return ProbeReport::unhealthy(kind, latency, attempt);
                    }
                }
            }

            tokio::time::sleep(self.config.retry_delay).await;
        }
    }
}
