//! Shared handler state.

use gateway_routing::Router;
use std::sync::Arc;
use std::time::Instant;

use crate::shutdown::ShutdownCoordinator;

/// State shared by every handler
#[derive(Debug, Clone)]
pub struct AppState {
    /// Request router
    pub router: Arc<Router>,
    /// Shutdown coordination and in-flight tracking
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// State around a router with a default shutdown coordinator
    #[must_use]
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            shutdown: Arc::new(ShutdownCoordinator::with_defaults()),
            started_at: Instant::now(),
        }
    }

    /// Replace the shutdown coordinator
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownCoordinator>) -> Self {
        self.shutdown = shutdown;
        self
    }
}
