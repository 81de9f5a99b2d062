//! Provider adapter contract.
//!
//! An adapter knows how to address one upstream API: how to build the HTTP
//! request, how to read a buffered response and how to decode streamed
//! events into normalized [`StreamingChunk`]s. Adapters never perform I/O;
//! the [`UpstreamTransport`](crate::transport::UpstreamTransport) does.

use std::collections::HashMap;
use std::fmt;

use gateway_core::{
    ChatCompletion, GatewayError, GatewayRequest, GatewayResult, ImageRef, StreamingChunk,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Upper bound on upstream body text kept on an error
pub const MAX_RESPONSE_TEXT: usize = 8 * 1024;

/// Addressing information for one upstream call
#[derive(Debug, Clone, Copy)]
pub struct UpstreamTarget<'a> {
    /// Provider-side model name
    pub model_name: &'a str,
    /// Base URL override; adapters fall back to their default
    pub base_url: Option<&'a str>,
    /// Credential for this attempt
    pub token: &'a SecretString,
    /// Resolved companion settings keyed by adapter setting name
    pub settings: &'a HashMap<String, String>,
    /// Ask the upstream for a streamed response
    pub stream: bool,
    /// Output cap from the catalog, used where the upstream requires one
    pub max_output: Option<u32>,
}

/// Fully-built upstream HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    /// Provider the request is addressed to
    pub provider: String,
    /// Absolute URL
    pub url: String,
    /// Request headers; credential headers are marked sensitive
    pub headers: HeaderMap,
    /// JSON body
    pub body: Value,
    /// Whether the upstream will answer with an event stream
    pub stream: bool,
}

impl HttpRequestSpec {
    /// POST request with a JSON body
    #[must_use]
    pub fn new(provider: impl Into<String>, url: impl Into<String>, body: Value, stream: bool) -> Self {
        Self {
            provider: provider.into(),
            url: url.into(),
            headers: HeaderMap::new(),
            body,
            stream,
        }
    }

    /// Add a plain header
    pub fn header(mut self, name: &'static str, value: &str) -> GatewayResult<Self> {
        let value = HeaderValue::from_str(value).map_err(|_| {
            GatewayError::configuration(format!("invalid value for header {name}"))
        })?;
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(self)
    }

    /// Add a credential header; the value is hidden from debug output
    pub fn secret_header(
        mut self,
        name: &'static str,
        prefix: &str,
        secret: &SecretString,
    ) -> GatewayResult<Self> {
        let mut value = HeaderValue::from_str(&format!("{prefix}{}", secret.expose_secret()))
            .map_err(|_| {
                GatewayError::configuration(format!(
                    "credential for {} contains characters not allowed in a header",
                    self.provider
                ))
            })?;
        value.set_sensitive(true);
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(self)
    }
}

/// Result of decoding one upstream stream event
#[derive(Debug)]
pub enum DecodeOutcome {
    /// Normalized chunks, possibly none
    Chunks(Vec<StreamingChunk>),
    /// The upstream signalled the end of the stream
    Done,
    /// The upstream reported an error inside the stream
    Error(GatewayError),
}

/// Per-stream decoder holding whatever state a provider's event format needs
pub trait StreamDecoder: Send {
    /// Decode one event. `event` is the SSE event name, if any.
    fn decode(&mut self, event: Option<&str>, data: Value) -> DecodeOutcome;
}

/// Provider adapter
pub trait ProviderAdapter: Send + Sync + fmt::Debug {
    /// Provider id as used in the catalog
    fn provider_id(&self) -> &str;

    /// Default base URL, if the provider has a fixed one
    fn default_base_url(&self) -> Option<&str>;

    /// Companion settings that must resolve before a request can be built
    fn required_settings(&self) -> &'static [&'static str] {
        &[]
    }

    /// Build the upstream request
    fn build_request(
        &self,
        request: &GatewayRequest,
        target: &UpstreamTarget<'_>,
    ) -> GatewayResult<HttpRequestSpec>;

    /// Parse a buffered success body
    fn parse_response(&self, body: &[u8]) -> GatewayResult<ChatCompletion>;

    /// Fresh decoder for one streamed response
    fn stream_decoder(&self) -> Box<dyn StreamDecoder>;

    /// Move generated images out of a provider payload.
    ///
    /// Called on every buffered body and every stream event before it is
    /// decoded. Image parts are removed from `payload` and their strings are
    /// moved, not copied.
    fn extract_images(&self, payload: &mut Value) -> Vec<ImageRef>;

    /// Turn a non-success response into a classified error
    fn error_from_response(&self, status: u16, body: &str) -> GatewayError {
        upstream_error(self.provider_id(), status, body)
    }
}

/// Resolve the base URL for a target without a trailing slash
pub(crate) fn base_url<'a>(
    adapter: &'a dyn ProviderAdapter,
    target: &UpstreamTarget<'a>,
) -> GatewayResult<&'a str> {
    target
        .base_url
        .or_else(|| adapter.default_base_url())
        .map(|url| url.trim_end_matches('/'))
        .ok_or_else(|| {
            GatewayError::configuration(format!(
                "no base URL configured for provider {}",
                adapter.provider_id()
            ))
        })
}

/// Deserialize a success body, reporting malformed JSON as an upstream fault
pub(crate) fn decode_body<T: DeserializeOwned>(provider: &str, body: &[u8]) -> GatewayResult<T> {
    serde_json::from_slice(body).map_err(|e| {
        GatewayError::transport(provider, format!("malformed response body: {e}"))
    })
}

/// Parse a success body, pulling its images out through `adapter` first
pub(crate) fn decode_with_images<T: DeserializeOwned>(
    adapter: &dyn ProviderAdapter,
    body: &[u8],
) -> GatewayResult<(T, Vec<ImageRef>)> {
    let provider = adapter.provider_id();
    let mut value: Value = decode_body(provider, body)?;
    let images = adapter.extract_images(&mut value);
    let parsed = serde_json::from_value(value).map_err(|e| {
        GatewayError::transport(provider, format!("malformed response body: {e}"))
    })?;
    Ok((parsed, images))
}

/// Build a classified upstream error from a status and body
pub fn upstream_error(provider: &str, status: u16, body: &str) -> GatewayError {
    let message = error_message(body).unwrap_or_else(|| format!("HTTP {status}"));
    GatewayError::upstream(provider, status, message, Some(truncate(body, MAX_RESPONSE_TEXT)))
}

/// Best-effort extraction of a human-readable message from an error body
pub fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error").unwrap_or(&value);
    match error {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        _ => None,
    }
}

/// Split a `data:<mime>;base64,<payload>` URL
pub fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, data) = rest.split_once(";base64,")?;
    Some((mime, data))
}

/// Image reference for a URL coming from an upstream payload
pub(crate) fn image_from_url(url: &str) -> ImageRef {
    match parse_data_url(url) {
        Some((mime, data)) => ImageRef::deferred(mime, data),
        None => ImageRef::url(url),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::ErrorClass;

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(r#"{"error":{"message":"bad key","type":"auth"}}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(
            error_message(r#"{"error":"overloaded"}"#).as_deref(),
            Some("overloaded")
        );
        assert_eq!(
            error_message(r#"{"message":"plain"}"#).as_deref(),
            Some("plain")
        );
        assert_eq!(error_message("<html>502</html>"), None);
    }

    #[test]
    fn test_upstream_error_classification() {
        let err = upstream_error("openai", 503, r#"{"error":{"message":"busy"}}"#);
        assert_eq!(err.class(), ErrorClass::UpstreamError);
        assert_eq!(err.upstream_status(), Some(503));

        let err = upstream_error(
            "openai",
            400,
            r#"{"error":{"message":"too long","code":"context_length_exceeded"}}"#,
        );
        assert_eq!(err.class(), ErrorClass::ClientError);

        let err = upstream_error("openai", 400, "nonsense");
        assert!(err.to_string().contains("HTTP 400"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "é".repeat(10);
        let t = truncate(&s, 5);
        assert_eq!(t.len(), 4);
        assert!(s.starts_with(&t));
    }

    #[test]
    fn test_parse_data_url() {
        assert_eq!(
            parse_data_url("data:image/png;base64,AAAA"),
            Some(("image/png", "AAAA"))
        );
        assert_eq!(parse_data_url("https://example.com/a.png"), None);
        assert_eq!(
            image_from_url("data:image/webp;base64,QQ=="),
            ImageRef::deferred("image/webp", "QQ==")
        );
    }

    #[test]
    fn test_secret_header_is_sensitive() {
        let token = SecretString::new("sk-test".to_string());
        let spec = HttpRequestSpec::new("openai", "https://x", Value::Null, false)
            .secret_header("authorization", "Bearer ", &token)
            .expect("valid header");
        let value = spec.headers.get("authorization").expect("header set");
        assert!(value.is_sensitive());
        assert_eq!(value.to_str().expect("ascii"), "Bearer sk-test");
        assert!(!format!("{:?}", spec.headers).contains("sk-test"));
    }
}
