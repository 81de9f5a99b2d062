//! HTTP request handlers for the gateway API.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::stream::StreamExt;
use gateway_core::{ErrorBody, ErrorClass, GatewayRequest};
use gateway_routing::{RouteInfo, RouteOutcome};
use gateway_streaming::count_message_images;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::{
    error::ApiError,
    extractors::{ApiKey, JsonBody},
    shutdown::RequestGuard,
    state::AppState,
};

/// Header naming the provider that served the request
pub const PROVIDER_HEADER: &str = "x-gateway-provider";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Version
    pub version: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Models in the catalog
    pub models: usize,
    /// Credentials currently excluded from selection
    pub unhealthy_keys: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Response {
    let draining = state.shutdown.is_shutting_down();
    let unhealthy_keys = state
        .router
        .key_health()
        .snapshot()
        .iter()
        .filter(|key| !key.healthy)
        .count();

    let body = HealthResponse {
        status: if draining { "draining" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        models: state.router.catalog().len(),
        unhealthy_keys,
    };
    let status = if draining {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(body)).into_response()
}

/// Chat completion endpoint (OpenAI compatible)
#[instrument(skip_all, fields(request_id = %request.id, model = %request.model))]
pub async fn chat_completion(
    State(state): State<AppState>,
    ApiKey(token): ApiKey,
    JsonBody(request): JsonBody<GatewayRequest>,
) -> Result<Response, ApiError> {
    let Some(guard) = RequestGuard::new(Arc::clone(&state.shutdown)) else {
        let body = ErrorBody::new(ErrorClass::GatewayError, "Gateway is shutting down");
        return Ok((StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response());
    };

    let caller = state.router.metadata().authenticate(&token).await?;
    let input_images = count_message_images(&request.messages);
    debug!(
        api_key_id = %caller.api_key_id,
        streaming = request.stream,
        input_images,
        "Processing chat completion request"
    );

    match state.router.route(request, &caller).await? {
        RouteOutcome::Completion { info, body, summary } => {
            info!(
                provider = %info.provider,
                attempts = info.attempts,
                input_images,
                images = summary.image_count,
                usage = ?summary.usage,
                "Chat completion served"
            );
            let mut response = Json(body).into_response();
            set_route_headers(&mut response, &info);
            Ok(response)
        }
        RouteOutcome::Stream { info, stream } => {
            let summary = stream.summary;
            let provider = info.provider.clone();
            tokio::spawn(async move {
                if let Ok(summary) = summary.await {
                    info!(
                        provider = %provider,
                        input_images,
                        images = summary.image_count,
                        usage = ?summary.usage,
                        finish_reason = ?summary.finish_reason,
                        error = ?summary.error,
                        "Chat completion stream finished"
                    );
                }
            });

            // The guard lives as long as the body stream
            let frames = stream.frames.map(move |frame| {
                let _ = &guard;
                Ok::<Bytes, Infallible>(frame)
            });
            let mut response = Response::new(Body::from_stream(frames));
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/event-stream"),
            );
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
            set_route_headers(&mut response, &info);
            Ok(response)
        }
    }
}

fn set_route_headers(response: &mut Response, info: &RouteInfo) {
    if let Ok(value) = HeaderValue::from_str(&info.provider) {
        response.headers_mut().insert(PROVIDER_HEADER, value);
    }
}
