//! Graceful shutdown handling for the gateway.
//!
//! On a termination signal the listener stops accepting connections and the
//! coordinator waits for in-flight requests, open SSE streams included, up to
//! the graceful timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Graceful shutdown configuration
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight requests to complete
    pub graceful_timeout: Duration,
    /// Interval to log drain progress
    pub progress_interval: Duration,
    /// Whether to reject new requests during shutdown
    pub reject_new_requests: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_secs(1),
            reject_new_requests: true,
        }
    }
}

impl ShutdownConfig {
    /// Create a new shutdown configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the graceful timeout
    #[must_use]
    pub fn with_graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = timeout;
        self
    }

    /// Set whether to reject new requests during shutdown
    #[must_use]
    pub fn with_reject_new_requests(mut self, reject: bool) -> Self {
        self.reject_new_requests = reject;
        self
    }
}

/// Shutdown phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Shutdown initiated, waiting for in-flight requests
    Draining,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Shutdown coordinator with in-flight request tracking
#[derive(Debug)]
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    phase: watch::Sender<ShutdownPhase>,
    shutdown_triggered: AtomicBool,
    in_flight_requests: AtomicU64,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    #[must_use]
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            config,
            phase,
            shutdown_triggered: AtomicBool::new(false),
            in_flight_requests: AtomicU64::new(0),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Check if shutdown is in progress
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_triggered.load(Ordering::SeqCst)
    }

    /// Get current shutdown phase
    #[must_use]
    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Get the number of in-flight requests
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight_requests.load(Ordering::SeqCst)
    }

    /// Should accept new requests?
    #[must_use]
    pub fn should_accept_requests(&self) -> bool {
        !self.config.reject_new_requests || !self.is_shutting_down()
    }

    /// Resolves once shutdown has been triggered
    pub fn triggered(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.phase.subscribe();
        async move {
            let _ = rx.wait_for(|phase| *phase != ShutdownPhase::Running).await;
        }
    }

    /// Resolves once shutdown is complete
    pub fn completed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.phase.subscribe();
        async move {
            let _ = rx.wait_for(|phase| *phase == ShutdownPhase::Complete).await;
        }
    }

    /// Trigger shutdown and wait for in-flight requests to drain
    pub async fn trigger_shutdown(&self, reason: &str) {
        if self
            .shutdown_triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Shutdown already triggered");
            return;
        }

        info!(reason = %reason, "Initiating graceful shutdown");
        self.set_phase(ShutdownPhase::Draining);

        match timeout(self.config.graceful_timeout, self.wait_for_drain()).await {
            Ok(()) => info!("All in-flight requests completed"),
            Err(_) => warn!(
                remaining = self.in_flight_count(),
                "Graceful timeout exceeded, forcing shutdown"
            ),
        }

        self.set_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown complete");
    }

    fn request_start(&self) {
        self.in_flight_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn request_complete(&self) {
        let prev = self.in_flight_requests.fetch_sub(1, Ordering::SeqCst);
        debug!(in_flight = prev.saturating_sub(1), "Request completed");
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        info!(phase = %phase, "Shutdown phase changed");
        self.phase.send_replace(phase);
    }

    async fn wait_for_drain(&self) {
        let mut last_logged = Instant::now();
        loop {
            let count = self.in_flight_count();
            if count == 0 {
                break;
            }
            if last_logged.elapsed() >= self.config.progress_interval {
                info!(remaining = count, "Waiting for in-flight requests");
                last_logged = Instant::now();
            }
            sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Tracks one request, including the lifetime of its response stream
#[derive(Debug)]
pub struct RequestGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl RequestGuard {
    /// Register a request, or `None` when shutdown rejects new requests
    #[must_use]
    pub fn new(coordinator: Arc<ShutdownCoordinator>) -> Option<Self> {
        if !coordinator.should_accept_requests() {
            return None;
        }
        coordinator.request_start();
        Some(Self { coordinator })
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.coordinator.request_complete();
    }
}

/// Wait for Ctrl+C or SIGTERM and return the signal name
pub async fn shutdown_signal() -> String {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        "ctrl+c"
    };

    #[cfg(unix)]
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
        "sigterm"
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<&str>();

    let signal_name = tokio::select! {
        name = ctrl_c => name,
        name = sigterm => name,
    };

    info!(signal = signal_name, "Received shutdown signal");
    signal_name.to_string()
}
