use axum::{
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::config::{Capability, Mode};
use crate::forward::UpstreamError;
use crate::models::ErrorResponse;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub error_type: &'static str,
    pub message: String,
}

impl AppError {
    pub fn not_implemented(capability: Capability, mode: Mode) -> Self {
        Self {
            status: StatusCode::NOT_IMPLEMENTED,
            error_type: "not_implemented",
            message: format!("{}={} is not implemented yet", capability.mode_env(), mode),
        }
    }

    pub fn upstream_timeout(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            error_type: "upstream_timeout",
            message: format!("Upstream timeout: {}", message.into()),
        }
    }

    pub fn upstream_failed(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            error_type: "upstream_error",
            message: format!("Upstream request failed: {}", message.into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error_type: "internal_error",
            message: message.into(),
        }
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout(text) => AppError::upstream_timeout(text),
            UpstreamError::Transport(text) => AppError::upstream_failed(text),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorResponse {
            detail: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
