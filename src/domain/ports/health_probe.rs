//! Health Probe Port

use crate::domain::entities::ProbeReport;
use async_trait::async_trait;

/// Bounded, retried health probe against a check URL.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe `url` up to `max_attempts` times (clamped to 1..=10),
    /// stopping at the first success.
    async fn probe(&self, url: &str, max_attempts: u32) -> ProbeReport;
}
