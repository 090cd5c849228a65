//! Infrastructure Layer
//!
//! Cross-cutting concerns and infrastructure components.

pub mod health_checker;
pub mod shutdown;

pub use health_checker::{HealthCheckConfig, HealthChecker};
pub use shutdown::{shutdown_signal, CycleGuard, ShutdownController};
