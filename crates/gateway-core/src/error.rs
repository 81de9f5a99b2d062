//! Error types for the gateway.
//!
//! `GatewayError` is the single error type that flows through routing,
//! dispatch and streaming. Each variant knows its error class, whether it
//! allows the fallback loop to move on to the next candidate, and how it is
//! rendered in the outbound `{"error": {...}}` body.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::classify::classify;

/// Result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Classification of an upstream failure.
///
/// The string forms are part of the outbound wire format and appear as the
/// `type` of in-stream error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient provider-side failure (5xx, 429, 404, transport, timeout)
    UpstreamError,
    /// Provider refused the content on policy grounds
    ContentFilter,
    /// The request itself was rejected by provider-side validation
    ClientError,
    /// Everything else, including authentication failures
    GatewayError,
}

impl ErrorClass {
    /// Wire representation of the class
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpstreamError => "upstream_error",
            Self::ContentFilter => "content_filter",
            Self::ClientError => "client_error",
            Self::GatewayError => "gateway_error",
        }
    }

    /// Whether a failure of this class lets the router try another candidate
    #[must_use]
    pub fn is_fallback_eligible(self) -> bool {
        matches!(self, Self::UpstreamError)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main gateway error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The inbound request is malformed
    #[error("Validation error: {message}")]
    Validation {
        /// Error message
        message: String,
        /// Offending field, if known
        field: Option<String>,
        /// Machine-readable code
        code: String,
    },

    /// Missing or invalid configuration (fatal for a candidate, not the request)
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// The caller presented a missing, unknown or inactive API key
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Error message
        message: String,
    },

    /// The requested model is not in the catalog
    #[error("Unknown model: {model}")]
    UnknownModel {
        /// Requested model id
        model: String,
    },

    /// The model exists but no active mapping can serve the request
    #[error("No active provider mapping for model {model}")]
    NoCandidates {
        /// Requested model id
        model: String,
        /// Pinned provider, if any
        provider: Option<String>,
    },

    /// IAM policy denied the candidate
    #[error("Access denied: {reason}")]
    AccessDenied {
        /// Id of the rule that caused the denial
        rule_id: Option<String>,
        /// Human readable reason
        reason: String,
    },

    /// Every key configured for a secret is currently unhealthy
    #[error("No healthy credential available for {secret_name} ({total} configured)")]
    NoHealthyCredential {
        /// Secret name that was exhausted
        secret_name: String,
        /// Number of configured keys
        total: usize,
    },

    /// Upstream provider returned an error or could not be reached
    #[error("Upstream {provider} failed ({class}): {message}")]
    Upstream {
        /// Provider id
        provider: String,
        /// Classification of the failure
        class: ErrorClass,
        /// HTTP status code, `None` for transport failures
        status_code: Option<u16>,
        /// Error message
        message: String,
        /// Raw upstream body, if any
        response_text: Option<String>,
    },

    /// Upstream attempt exceeded its timeout
    #[error("Upstream {provider} timed out after {timeout:?}")]
    Timeout {
        /// Provider id
        provider: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Guardrails blocked the request before dispatch
    #[error("Request blocked by guardrails: {}", violations.join(", "))]
    GuardrailBlocked {
        /// Violated rule descriptions
        violations: Vec<String>,
    },

    /// Every candidate was tried and failed
    #[error("All {attempted} attempted candidates failed: {last}")]
    CandidatesExhausted {
        /// Number of candidates that were dispatched
        attempted: usize,
        /// Error of the last attempted candidate
        #[source]
        last: Box<GatewayError>,
    },

    /// Failure while processing a stream
    #[error("Streaming error: {message}")]
    Streaming {
        /// Error message
        message: String,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl GatewayError {
    /// Create a validation error
    pub fn validation(
        message: impl Into<String>,
        field: Option<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            field,
            code: code.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create an unknown model error
    pub fn unknown_model(model: impl Into<String>) -> Self {
        Self::UnknownModel {
            model: model.into(),
        }
    }

    /// Create an access denied error
    pub fn access_denied(rule_id: Option<String>, reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            rule_id,
            reason: reason.into(),
        }
    }

    /// Create an upstream error from an HTTP response, classifying it
    pub fn upstream(
        provider: impl Into<String>,
        status_code: u16,
        message: impl Into<String>,
        response_text: Option<String>,
    ) -> Self {
        let class = classify(status_code, response_text.as_deref());
        Self::Upstream {
            provider: provider.into(),
            class,
            status_code: Some(status_code),
            message: message.into(),
            response_text,
        }
    }

    /// Create an upstream error for a transport-level failure
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.into(),
            class: ErrorClass::UpstreamError,
            status_code: None,
            message: message.into(),
            response_text: None,
        }
    }

    /// Create a timeout error
    pub fn timeout(provider: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            provider: provider.into(),
            timeout,
        }
    }

    /// Create a streaming error
    pub fn streaming(message: impl Into<String>) -> Self {
        Self::Streaming {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error class used on the wire and for fallback decisions
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Upstream { class, .. } => *class,
            Self::Timeout { .. } | Self::Streaming { .. } => ErrorClass::UpstreamError,
            Self::Validation { .. }
            | Self::UnknownModel { .. }
            | Self::NoCandidates { .. }
            | Self::GuardrailBlocked { .. } => ErrorClass::ClientError,
            Self::CandidatesExhausted { last, .. } => last.class(),
            Self::Configuration { .. }
            | Self::Unauthorized { .. }
            | Self::AccessDenied { .. }
            | Self::NoHealthyCredential { .. }
            | Self::Internal { .. } => ErrorClass::GatewayError,
        }
    }

    /// Whether the fallback loop may continue with the next candidate
    #[must_use]
    pub fn is_fallback_eligible(&self) -> bool {
        match self {
            Self::Upstream { class, .. } => class.is_fallback_eligible(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Whether the error only rules out the current candidate
    #[must_use]
    pub fn is_candidate_scoped(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied { .. } | Self::Configuration { .. } | Self::NoHealthyCredential { .. }
        )
    }

    /// Upstream HTTP status, when the error came from a response
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status_code, .. } => *status_code,
            Self::CandidatesExhausted { last, .. } => last.upstream_status(),
            _ => None,
        }
    }

    /// The error of the last attempted candidate for aggregate failures
    #[must_use]
    pub fn last_error(&self) -> &Self {
        match self {
            Self::CandidatesExhausted { last, .. } => last.last_error(),
            other => other,
        }
    }

    /// HTTP status code to return to the caller
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::NoCandidates { .. } | Self::GuardrailBlocked { .. } => {
                400
            }
            Self::UnknownModel { .. } => 404,
            Self::Unauthorized { .. } => 401,
            Self::AccessDenied { .. } => 403,
            Self::NoHealthyCredential { .. } => 503,
            Self::Upstream {
                class, status_code, ..
            } => match class {
                ErrorClass::ClientError | ErrorClass::ContentFilter => 400,
                ErrorClass::UpstreamError if *status_code == Some(429) => 429,
                ErrorClass::UpstreamError => 502,
                ErrorClass::GatewayError => 500,
            },
            Self::Timeout { .. } => 504,
            Self::CandidatesExhausted { last, .. } => last.status_code(),
            Self::Streaming { .. } => 502,
            Self::Configuration { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Wire name of the error class, the `type` field of the error body
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        self.class().as_str()
    }

    /// Machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "invalid_request",
            Self::Configuration { .. } => "configuration_error",
            Self::Unauthorized { .. } => "invalid_api_key",
            Self::UnknownModel { .. } => "model_not_found",
            Self::NoCandidates { .. } => "no_provider_available",
            Self::AccessDenied { .. } => "access_denied",
            Self::NoHealthyCredential { .. } => "no_healthy_key",
            Self::Upstream { class, .. } => class.as_str(),
            Self::Timeout { .. } => "upstream_timeout",
            Self::GuardrailBlocked { .. } => "guardrail_blocked",
            Self::CandidatesExhausted { last, .. } => last.code(),
            Self::Streaming { .. } => "streaming_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Variant name used in diagnostic cause chains
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::Configuration { .. } => "ConfigError",
            Self::Unauthorized { .. } => "AuthenticationError",
            Self::UnknownModel { .. } => "UnknownModel",
            Self::NoCandidates { .. } => "NoCandidates",
            Self::AccessDenied { .. } => "IamException",
            Self::NoHealthyCredential { .. } => "NoHealthyCredential",
            Self::Upstream { class, .. } => match class {
                ErrorClass::UpstreamError => "UpstreamError",
                ErrorClass::ContentFilter => "ContentFilterError",
                ErrorClass::ClientError => "ClientError",
                ErrorClass::GatewayError => "GatewayError",
            },
            Self::Timeout { .. } => "TimeoutError",
            Self::GuardrailBlocked { .. } => "GuardrailBlocked",
            Self::CandidatesExhausted { .. } => "CandidatesExhausted",
            Self::Streaming { .. } => "StreamingError",
            Self::Internal { .. } => "InternalError",
        }
    }

    /// Build the outbound error body
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        let last = self.last_error();
        let (param, response_text) = match last {
            Self::Validation { field, .. } => (field.clone(), None),
            Self::Upstream { response_text, .. } => (None, response_text.clone()),
            _ => (None, None),
        };
        ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                error_type: self.error_type().to_string(),
                code: self.code().to_string(),
                param,
                response_text,
            },
        }
    }
}

/// Outbound error body: `{"error": {message, type, code, param, responseText}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error details
    pub error: ErrorDetail,
}

/// Error details carried in [`ErrorBody`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Human readable message
    pub message: String,
    /// Error class
    #[serde(rename = "type")]
    pub error_type: String,
    /// Machine-readable code
    pub code: String,
    /// Offending request parameter
    pub param: Option<String>,
    /// Raw upstream response body
    #[serde(rename = "responseText")]
    pub response_text: Option<String>,
}

impl ErrorBody {
    /// Body for an error synthesized by the gateway itself
    #[must_use]
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                error_type: class.as_str().to_string(),
                code: class.as_str().to_string(),
                param: None,
                response_text: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_is_classified() {
        let err = GatewayError::upstream("openai", 503, "unavailable", None);
        assert_eq!(err.class(), ErrorClass::UpstreamError);
        assert!(err.is_fallback_eligible());
        assert_eq!(err.status_code(), 502);

        let err = GatewayError::upstream("openai", 401, "bad key", None);
        assert_eq!(err.class(), ErrorClass::GatewayError);
        assert!(!err.is_fallback_eligible());
    }

    #[test]
    fn test_rate_limit_status_is_preserved() {
        let err = GatewayError::upstream("anthropic", 429, "slow down", None);
        assert_eq!(err.status_code(), 429);
    }

    #[test]
    fn test_candidate_scoped_errors() {
        assert!(GatewayError::access_denied(Some("r1".into()), "nope").is_candidate_scoped());
        assert!(GatewayError::configuration("missing region").is_candidate_scoped());
        assert!(!GatewayError::internal("boom").is_candidate_scoped());
    }

    #[test]
    fn test_exhausted_delegates_to_last() {
        let last = GatewayError::upstream("azure", 500, "down", Some("{}".into()));
        let err = GatewayError::CandidatesExhausted {
            attempted: 3,
            last: Box::new(last),
        };
        assert_eq!(err.class(), ErrorClass::UpstreamError);
        assert_eq!(err.upstream_status(), Some(500));
        assert!(matches!(err.last_error(), GatewayError::Upstream { .. }));
        assert!(err.to_string().contains("3 attempted"));
    }

    #[test]
    fn test_error_body_shape() {
        let err = GatewayError::upstream("openai", 500, "down", Some("oops".into()));
        let body = serde_json::to_value(err.to_body()).expect("serialize");
        assert_eq!(body["error"]["type"], "upstream_error");
        assert_eq!(body["error"]["responseText"], "oops");
        assert!(body["error"]["param"].is_null());
    }

    #[test]
    fn test_unauthorized_maps_to_401() {
        let err = GatewayError::unauthorized("unknown API key");
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.code(), "invalid_api_key");
        assert!(!err.is_fallback_eligible());
    }

    #[test]
    fn test_timeout_is_upstream_class() {
        let err = GatewayError::timeout("google-ai-studio", Duration::from_secs(5));
        assert_eq!(err.class(), ErrorClass::UpstreamError);
        assert!(err.is_fallback_eligible());
        assert_eq!(err.status_code(), 504);
    }
}
