//! # Gateway Resilience
//!
//! Shared, process-wide state that keeps the router away from bad credentials
//! and slow metadata lookups:
//! - Credential rotation over comma-separated secrets
//! - Key health tracking with temporary and permanent blacklisting
//! - Healthy credential resolution
//! - Stale-while-revalidate cache with request coalescing

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod credentials;
pub mod key_health;
pub mod rotation;
pub mod swr_cache;

// Re-export main types
pub use credentials::{CredentialResolver, ResolvedCredential};
pub use key_health::{KeyHealth, KeyHealthConfig, KeyHealthSnapshot, KeyHealthTracker};
pub use rotation::{nth_value, split_values, CredentialRotator};
pub use swr_cache::{CacheEntry, SwrCache, SwrCacheStats, SwrOptions};
