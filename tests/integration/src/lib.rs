//! Integration tests for the LLM routing gateway
//!
//! This crate exercises the router end to end:
//! - Candidate selection around unhealthy credentials
//! - Fallback and commit semantics for buffered and streamed responses
//! - IAM enforcement per candidate
//! - Stale-while-revalidate metadata caching
//! - The HTTP surface and the real upstream transport

pub mod fixtures;
pub mod mock_transport;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_transport::{MockReply, MockTransport, RecordedCall};

#[cfg(test)]
mod api_tests;
#[cfg(test)]
mod cache_tests;
#[cfg(test)]
mod scenario_tests;
#[cfg(test)]
mod transport_tests;
