//! # Gateway Routing
//!
//! Model resolution and provider fallback for the LLM routing gateway.
//!
//! This crate provides:
//! - The provider catalog and its queries (active mappings, coding and free models)
//! - Cached metadata lookups and caller authentication
//! - IAM rule evaluation per API key
//! - Candidate ordering and the fallback loop

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod iam;
pub mod metadata;
pub mod router;
pub mod selector;

// Re-export main types
pub use catalog::{active_mappings, active_mappings_at, is_coding_model, is_truly_free, ProviderCatalog};
pub use iam::{evaluate, IamDecision, IamEvaluator};
pub use metadata::CachedMetadata;
pub use router::{RouteInfo, RouteOutcome, Router, RouterBuilder, RouterConfig};
pub use selector::{unmet_requirements, Candidate, CandidateQueue};
