//! Upstream error classification and cause-chain diagnostics.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error as StdError;

use crate::error::{ErrorClass, GatewayError};

/// Maximum number of links walked by [`describe_error_chain`]
pub const MAX_CAUSE_DEPTH: usize = 5;

/// Body markers emitted by providers when content is refused on policy grounds
const CONTENT_FILTER_MARKERS: &[&str] = &[
    "ResponsibleAIPolicyViolation",
    "content_policy_violation",
    "PROHIBITED_CONTENT",
    "\"content_filter\"",
];

/// Body signatures of provider-side request validation failures
const CLIENT_ERROR_SIGNATURES: &[&str] = &[
    "must contain the word 'json'",
    "context_length_exceeded",
    "maximum context length",
    "Invalid schema for response_format",
];

/// Classify an upstream failure.
///
/// Checks run in a fixed order and the first match wins: a retryable status
/// (`>= 500`, `429`, `404`) is always `upstream_error`, even when the body also
/// carries a content-filter marker.
#[must_use]
pub fn classify(status_code: u16, body: Option<&str>) -> ErrorClass {
    if status_code >= 500 || status_code == 429 || status_code == 404 {
        return ErrorClass::UpstreamError;
    }

    let body = body.unwrap_or_default();
    if CONTENT_FILTER_MARKERS.iter().any(|m| body.contains(m)) {
        return ErrorClass::ContentFilter;
    }
    if CLIENT_ERROR_SIGNATURES.iter().any(|s| body.contains(s)) {
        return ErrorClass::ClientError;
    }

    ErrorClass::GatewayError
}

#[allow(clippy::expect_used)]
static BEARER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").expect("valid regex"));

#[allow(clippy::expect_used)]
static QUERY_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([?&](?:api_)?key=)[^&\s]+").expect("valid regex"));

#[allow(clippy::expect_used)]
static SK_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"sk-[A-Za-z0-9_-]{8,}").expect("valid regex"));

/// Mask credentials that may appear in upstream messages or URLs
#[must_use]
pub fn redact_secrets(text: &str) -> String {
    let text = BEARER_RE.replace_all(text, "Bearer [REDACTED]");
    let text = QUERY_KEY_RE.replace_all(&text, "${1}[REDACTED]");
    SK_KEY_RE.replace_all(&text, "sk-[REDACTED]").into_owned()
}

fn describe_link(err: &(dyn StdError + 'static)) -> String {
    if let Some(gw) = err.downcast_ref::<GatewayError>() {
        return describe_gateway(gw);
    }
    if let Some(gw) = err.downcast_ref::<Box<GatewayError>>() {
        return describe_gateway(gw);
    }
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        return format!("IoError: {io} (code: {:?})", io.kind());
    }
    if let Some(json) = err.downcast_ref::<serde_json::Error>() {
        return format!("JsonError: {json}");
    }
    format!("Error: {err}")
}

fn describe_gateway(err: &GatewayError) -> String {
    // Aggregates carry their last error as the source; keep this link short.
    let message = match err {
        GatewayError::CandidatesExhausted { attempted, .. } => {
            format!("{attempted} candidates attempted")
        }
        other => other.to_string(),
    };
    format!("{}: {message} (code: {})", err.kind_name(), err.code())
}

/// Walk an error's cause chain and render it for logs.
///
/// At most [`MAX_CAUSE_DEPTH`] links are rendered, joined by `" -> "`.
/// Credentials are masked in the result.
#[must_use]
pub fn describe_error_chain(err: &(dyn StdError + 'static)) -> String {
    let links: Vec<String> = std::iter::successors(Some(err), |e| (*e).source())
        .take(MAX_CAUSE_DEPTH)
        .map(describe_link)
        .collect();
    redact_secrets(&links.join(" -> "))
}
