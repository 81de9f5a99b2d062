//! Upstream HTTP transport.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use gateway_core::{GatewayError, GatewayResult};
use reqwest::header::HeaderMap;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::adapter::{HttpRequestSpec, MAX_RESPONSE_TEXT};

/// Response body as a stream of byte chunks
pub type ByteStream = BoxStream<'static, GatewayResult<Bytes>>;

/// Upstream response with the body not yet read
pub struct UpstreamResponse {
    /// HTTP status
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Body chunks
    pub body: ByteStream,
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl UpstreamResponse {
    /// Response from pre-split body chunks
    #[must_use]
    pub fn from_chunks(status: u16, chunks: Vec<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }

    /// Response with a single body chunk
    #[must_use]
    pub fn from_bytes(status: u16, body: impl Into<Bytes>) -> Self {
        Self::from_chunks(status, vec![body.into()])
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Read the whole body
    pub async fn bytes(mut self) -> GatewayResult<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Read at most `limit` bytes of the body as lossy UTF-8
    pub async fn text(mut self, limit: usize) -> GatewayResult<String> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            let chunk = chunk?;
            let room = limit.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if buf.len() >= limit {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read the body of a non-success response into a classified error
    pub async fn into_error(self, adapter: &dyn crate::ProviderAdapter) -> GatewayError {
        let status = self.status;
        match self.text(MAX_RESPONSE_TEXT).await {
            Ok(body) => adapter.error_from_response(status, &body),
            Err(_) => adapter.error_from_response(status, ""),
        }
    }
}

/// Sends built requests upstream
#[async_trait]
pub trait UpstreamTransport: Send + Sync + fmt::Debug {
    /// Send the request and return once response headers arrive
    async fn send(&self, request: HttpRequestSpec) -> GatewayResult<UpstreamResponse>;
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Idle pooled connection lifetime
    pub pool_idle_timeout: Duration,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
        }
    }
}

/// [`UpstreamTransport`] over a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Transport with default settings
    pub fn new() -> GatewayResult<Self> {
        Self::with_config(&TransportConfig::default())
    }

    /// Transport with explicit settings
    pub fn with_config(config: &TransportConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| GatewayError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(provider = %request.provider, stream = request.stream))]
    async fn send(&self, request: HttpRequestSpec) -> GatewayResult<UpstreamResponse> {
        let url = url::Url::parse(&request.url).map_err(|e| {
            GatewayError::configuration(format!(
                "invalid upstream URL for {}: {e}",
                request.provider
            ))
        })?;
        let provider = request.provider;

        let response = self
            .client
            .post(url)
            .headers(request.headers)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| GatewayError::transport(&provider, e.without_url().to_string()))?;

        let status = response.status().as_u16();
        debug!(status, "Upstream responded");
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| GatewayError::transport(&provider, e.without_url().to_string()))
            })
            .boxed();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
