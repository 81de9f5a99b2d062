//! # Gateway Telemetry
//!
//! Logging setup for the LLM routing gateway.
//!
//! Every crate logs through `tracing` with structured fields; this crate
//! installs the subscriber that renders them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;

// Re-export main types
pub use logging::{init_logging, LoggingConfig, LoggingError};
