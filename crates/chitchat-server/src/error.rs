//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chitchat_core::{BusError, GatewayError};
use chitchat_protocol::ErrorResponse;
use thiserror::Error;
use tracing::error;

use crate::metrics;

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Identity headers missing or malformed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed request parameter.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Gateway operation failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_)
            | ApiError::Gateway(GatewayError::InvalidChannel(_))
            | ApiError::Gateway(GatewayError::Bus(BusError::InvalidChannel(_))) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Gateway(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
            metrics::record_error("http");
        }
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}
