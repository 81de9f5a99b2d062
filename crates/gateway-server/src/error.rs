//! HTTP rendering of gateway errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gateway_core::{describe_error_chain, GatewayError};
use tracing::{debug, error};

/// Error returned by handlers, rendered as `{"error": {...}}`
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl ApiError {
    /// Malformed request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(GatewayError::validation(message, None, "invalid_request"))
    }

    /// Missing or invalid caller credentials
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self(GatewayError::unauthorized(message))
    }

    /// HTTP status of the response
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let chain = describe_error_chain(&self.0);
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %chain, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %chain, "Request rejected");
        }
        (status, Json(self.0.to_body())).into_response()
    }
}
