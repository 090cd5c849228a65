//! Graceful Shutdown Handler
//!
//! Cancels pending per-service timers and lets in-flight cycles finish.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Shutdown coordinator for graceful termination.
///
/// Tracks cycles in flight and signals shutdown to every service task.
#[derive(Clone)]
pub struct ShutdownController {
    token: CancellationToken,
    /// Number of update cycles currently running
    in_flight: Arc<AtomicUsize>,
    /// Notified when the last in-flight cycle ends
    drained: Arc<Notify>,
}

impl ShutdownController {
    /// Create a new shutdown controller.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Token that service tasks select on while waiting for their next cycle.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate graceful shutdown.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("initiating graceful shutdown");
            self.token.cancel();
        }
    }

    /// Check if shutdown has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of cycles currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Mark a cycle as started; the count drops when the guard does.
    pub fn cycle_guard(&self) -> CycleGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        CycleGuard {
            controller: self.clone(),
        }
    }

    fn cycle_ended(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Wait until no cycle is in flight. No timeout.
    pub async fn wait_for_drain(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // register before checking, or a wakeup between check and await is lost
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            tracing::info!(in_flight = self.in_flight(), "waiting for in-flight cycles");
            notified.await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for an in-flight cycle.
pub struct CycleGuard {
    controller: ShutdownController,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.controller.cycle_ended();
    }
}

/// Wait for Ctrl+C or SIGTERM, then trigger shutdown.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
    }

    controller.shutdown();
}
