//! # Gateway Server
//!
//! Thin HTTP adapter for the LLM routing gateway.
//!
//! This crate provides:
//! - `POST /v1/chat/completions` (JSON or SSE)
//! - `GET /health`
//! - OpenAI-shaped error bodies
//! - Graceful shutdown that waits for open streams

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;

// Re-export main types
pub use error::ApiError;
pub use routes::create_router;
pub use server::{serve, serve_with_listener, ServerError};
pub use shutdown::{
    shutdown_signal, RequestGuard, ShutdownConfig, ShutdownCoordinator, ShutdownPhase,
};
pub use state::AppState;
