//! Outbound POST to an upstream service.
//!
//! The gateway forwards only a restricted header set: `content-type` and
//! `x-api-key`. Both timeouts live on the shared client, so every call gets
//! the same connect and total budget.

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use reqwest::header::CONTENT_TYPE;
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Transport(String),
}

impl UpstreamError {
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Timeout(_) => "upstream_timeout",
            UpstreamError::Transport(_) => "upstream_error",
        }
    }
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

pub fn build_client(connect_timeout: Duration, timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()
}

/// A caller-supplied `x-api-key` wins over the configured inner key.
pub fn forward_headers(inbound: &HeaderMap, inner_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(content_type) = inbound.get(CONTENT_TYPE).filter(|v| !v.is_empty()) {
        headers.insert(CONTENT_TYPE, content_type.clone());
    }

    if let Some(api_key) = inbound.get(API_KEY_HEADER) {
        headers.insert(API_KEY_HEADER, api_key.clone());
    } else if !inner_key.is_empty() {
        match HeaderValue::from_str(inner_key) {
            Ok(value) => {
                headers.insert(API_KEY_HEADER, value);
            }
            Err(_) => tracing::warn!("inner calls key is not a valid header value; not injected"),
        }
    }
    headers
}

pub async fn forward_post(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<UpstreamResponse, UpstreamError> {
    let resp = client
        .post(url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(classify)?;

    let status = resp.status();
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let body = resp.bytes().await.map_err(classify)?;

    Ok(UpstreamResponse {
        status,
        content_type,
        body,
    })
}

fn classify(err: reqwest::Error) -> UpstreamError {
    let text = describe(&err);
    if err.is_timeout() {
        UpstreamError::Timeout(text)
    } else {
        UpstreamError::Transport(text)
    }
}

fn describe(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
