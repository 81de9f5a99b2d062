//! # Gateway Core
//!
//! Core types, collaborator traits, and error handling for the LLM routing gateway.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - Request types and capability requirements
//! - Model catalog data model
//! - Normalized streaming chunks with deferred image payloads
//! - Error taxonomy, upstream classification and cause-chain diagnostics
//! - Metadata store and guardrail collaborator traits

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod classify;
pub mod error;
pub mod guardrail;
pub mod request;
pub mod response;
pub mod store;
pub mod streaming;
pub mod types;

// Re-export commonly used types
pub use catalog::{
    Modality, ModelCapabilities, ModelDefinition, ProviderMapping, ProviderPricing,
    StabilityLevel,
};
pub use classify::{classify, describe_error_chain, redact_secrets};
pub use error::{ErrorBody, ErrorClass, GatewayError, GatewayResult};
pub use guardrail::{GuardrailOutcome, Guardrails, NoopGuardrails, Redaction};
pub use request::{
    ChatMessage, ContentPart, GatewayRequest, MessageContent, MessageRole, ModelSelector,
    RequestRequirements, ResponseFormat, ToolCall, ToolDefinition,
};
pub use response::ChatCompletion;
pub use store::{
    ApiKeyRecord, IamRule, IamRuleType, IamRuleValue, InMemoryMetadataStore, MetadataSnapshot,
    MetadataStore, OrganizationRecord, ProjectRecord, ProviderKeyRecord, RecordStatus,
};
pub use streaming::{ImageRef, StreamingChunk, ToolCallDelta, Usage};
pub use types::{CallerContext, RequestId};
