//! Listener setup and serving with graceful shutdown.

use gateway_config::ServerSettings;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::routes::create_router;
use crate::shutdown::{shutdown_signal, ShutdownCoordinator};
use crate::state::AppState;

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The server stopped with an I/O error
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Bind `settings` and serve until a termination signal has been handled
pub async fn serve(settings: &ServerSettings, state: AppState) -> Result<(), ServerError> {
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(addr = %addr, "Gateway listening");
    serve_with_listener(listener, state).await
}

/// Serve on an already bound listener
pub async fn serve_with_listener(listener: TcpListener, state: AppState) -> Result<(), ServerError> {
    let coordinator: Arc<ShutdownCoordinator> = Arc::clone(&state.shutdown);
    let app = create_router(state);

    let signal_task = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            let reason = shutdown_signal().await;
            coordinator.trigger_shutdown(&reason).await;
        })
    };

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(coordinator.triggered())
        .into_future();
    let result = tokio::select! {
        result = server => result,
        () = coordinator.completed() => {
            info!("Drain finished, closing remaining connections");
            Ok(())
        }
    };

    signal_task.abort();
    if let Err(e) = &result {
        error!(error = %e, "Server error");
    }
    result.map_err(ServerError::from)
}
