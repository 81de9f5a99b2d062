//! # Gateway Providers
//!
//! Provider adapters and the upstream transport for the LLM routing gateway.
//!
//! Adapters translate a normalized request into one provider's wire format
//! and decode its buffered or streamed responses back into normalized
//! chunks:
//! - OpenAI and OpenAI-compatible hosts
//! - Anthropic Messages
//! - Google AI Studio (Gemini)
//! - Azure OpenAI deployments

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod registry;
pub mod transport;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(feature = "azure")]
pub mod azure;

#[cfg(feature = "google")]
pub mod google;

// Re-export main types
pub use adapter::{
    error_message, parse_data_url, upstream_error, DecodeOutcome, HttpRequestSpec,
    ProviderAdapter, StreamDecoder, UpstreamTarget,
};
pub use registry::ProviderRegistry;
pub use transport::{
    ByteStream, ReqwestTransport, TransportConfig, UpstreamResponse, UpstreamTransport,
};

#[cfg(feature = "openai")]
pub use openai::OpenAIAdapter;

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicAdapter;

#[cfg(feature = "azure")]
pub use azure::AzureOpenAIAdapter;

#[cfg(feature = "google")]
pub use google::GoogleAdapter;
