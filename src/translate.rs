use axum::{
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::error::AppError;
use crate::forward::UpstreamResponse;

/// Re-encodes JSON upstream bodies; anything else passes through byte for byte.
pub fn into_response(upstream: UpstreamResponse) -> Result<Response, AppError> {
    let UpstreamResponse {
        status,
        content_type,
        body,
    } = upstream;

    match content_type {
        Some(content_type) if content_type.contains("application/json") => {
            let value: Value = serde_json::from_slice(&body).map_err(|e| {
                AppError::internal(format!("Upstream returned invalid JSON: {}", e))
            })?;
            Ok((status, Json(value)).into_response())
        }
        Some(content_type) => Ok((status, [(CONTENT_TYPE, content_type)], body).into_response()),
        None => {
            let mut resp = (status, body).into_response();
            resp.headers_mut().remove(CONTENT_TYPE);
            Ok(resp)
        }
    }
}
