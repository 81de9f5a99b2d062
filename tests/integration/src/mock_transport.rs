//! Scripted in-process upstream for integration testing
//!
//! Responses are queued per provider id and consumed in order. Every call is
//! recorded so tests can assert which candidates were actually invoked.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use gateway_core::{GatewayError, GatewayResult};
use gateway_providers::{HttpRequestSpec, UpstreamResponse, UpstreamTransport};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

/// One scripted upstream reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Complete response body
    Body {
        /// HTTP status
        status: u16,
        /// Body text
        body: String,
    },
    /// 200 response delivered in the given chunks
    Chunks(Vec<String>),
    /// Headers arrive, then the body fails before its first byte
    BrokenBody,
    /// Connection-level failure
    ConnectError,
}

impl MockReply {
    /// 200 with a JSON body
    pub fn json(body: &Value) -> Self {
        Self::Body {
            status: 200,
            body: body.to_string(),
        }
    }

    /// Error status with a body
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Body {
            status,
            body: body.into(),
        }
    }

    /// SSE stream of `data:` events followed by `[DONE]`
    pub fn sse(events: &[Value]) -> Self {
        let mut chunks: Vec<String> = events.iter().map(|e| format!("data: {e}\n\n")).collect();
        chunks.push("data: [DONE]\n\n".to_string());
        Self::Chunks(chunks)
    }
}

/// A recorded upstream call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Provider id of the adapter that built the request
    pub provider: String,
    /// Target URL
    pub url: String,
    /// Request body
    pub body: Value,
    /// Whether a stream was requested
    pub stream: bool,
}

/// Scripted [`UpstreamTransport`]
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    /// Create an empty transport; unscripted calls fail to connect
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `provider`
    pub fn reply(&self, provider: &str, reply: MockReply) -> &Self {
        self.replies
            .lock()
            .entry(provider.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// All calls in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of calls made to `provider`
    pub fn call_count(&self, provider: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.provider == provider)
            .count()
    }
}

#[async_trait]
impl UpstreamTransport for MockTransport {
    async fn send(&self, request: HttpRequestSpec) -> GatewayResult<UpstreamResponse> {
        self.calls.lock().push(RecordedCall {
            provider: request.provider.clone(),
            url: request.url.clone(),
            body: request.body.clone(),
            stream: request.stream,
        });

        let reply = self
            .replies
            .lock()
            .get_mut(&request.provider)
            .and_then(VecDeque::pop_front)
            .unwrap_or(MockReply::ConnectError);

        match reply {
            MockReply::Body { status, body } => Ok(UpstreamResponse::from_bytes(status, body)),
            MockReply::Chunks(chunks) => Ok(UpstreamResponse::from_chunks(
                200,
                chunks.into_iter().map(Bytes::from).collect(),
            )),
            MockReply::BrokenBody => {
                let mut response = UpstreamResponse::from_chunks(200, Vec::new());
                let provider = request.provider.clone();
                response.body = stream::once(async move {
                    Err(GatewayError::transport(provider, "connection reset by peer"))
                })
                .boxed();
                Ok(response)
            }
            MockReply::ConnectError => Err(GatewayError::transport(
                request.provider,
                "connection refused",
            )),
        }
    }
}
