use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Uri},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use opentelemetry::global;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::KeyValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

use crate::audit_log::{headers_to_map, now_ms, AuditContext};
use crate::config::{Capability, Mode, HEALTH_SERVICE_NAME};
use crate::error::AppError;
use crate::forward::{forward_headers, forward_post};
use crate::models::{HealthResponse, HealthRoutes, ReadyResponse};
use crate::state::{AppState, InflightGuard};
use crate::translate;

pub const AUTH_TELEGRAM_PATHS: &[&str] = &["/auth/telegram"];
pub const AI_CHAT_PATHS: &[&str] = &["/ai/chat", "/api/chat"];
pub const RAG_QUERY_PATHS: &[&str] = &["/rag/query", "/query"];

/// Every path in a group is registered with the same handler, so aliases
/// cannot drift from their primary route.
pub fn router(state: AppState) -> Router {
    let mut router: Router<AppState> = Router::new();
    for path in AUTH_TELEGRAM_PATHS {
        router = router.route(path, post(auth_telegram));
    }
    for path in AI_CHAT_PATHS {
        router = router.route(path, post(ai_chat));
    }
    for path in RAG_QUERY_PATHS {
        router = router.route(path, post(rag_query));
    }
    // Payloads are opaque to the gateway; size limits belong to the upstreams.
    router
        .layer(DefaultBodyLimit::disable())
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

pub async fn auth_telegram(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let url = state.config.auth_telegram_url();
    forward_capability(&state, Capability::Auth, url, uri.path(), &headers, body).await
}

pub async fn ai_chat(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let url = state.config.ai_chat_url();
    forward_capability(&state, Capability::Ai, url, uri.path(), &headers, body).await
}

pub async fn rag_query(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let url = state.config.rag_query_url();
    forward_capability(&state, Capability::Rag, url, uri.path(), &headers, body).await
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: HEALTH_SERVICE_NAME,
        mode: state.config.mode,
        route_modes: state.config.route_modes.clone(),
        routes: HealthRoutes {
            auth_telegram: AUTH_TELEGRAM_PATHS[0],
            ai_chat: AI_CHAT_PATHS,
            rag_query: RAG_QUERY_PATHS,
        },
    })
}

pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ready",
        service: HEALTH_SERVICE_NAME,
        mode: state.config.mode,
    })
}

async fn forward_capability(
    state: &AppState,
    capability: Capability,
    url: String,
    route: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request_id = next_request_id();
    let start = Instant::now();
    let mode = state.config.capability_mode(capability);
    let forwarding = mode == Mode::Forward;

    let audit = state.audit_logger.as_ref().map(|_| AuditContext {
        ts_start_ms: now_ms(),
        request_id: request_id.clone(),
        route: route.to_string(),
        capability: capability.as_str(),
        mode,
        upstream_url: forwarding.then(|| url.clone()),
        request_headers: headers_to_map(headers),
        request_bytes: body.len(),
    });

    let result = if forwarding {
        let _inflight = InflightGuard::new(state.inflight_count.clone());
        state
            .metrics
            .requests
            .add(1, &[KeyValue::new("capability", capability.as_str())]);
        let outbound = forward_headers(headers, &state.config.inner_calls_key);
        match forward_post(&state.client, &url, outbound, body).await {
            Ok(upstream) => translate::into_response(upstream),
            Err(err) => {
                info!(
                    request_id = %request_id,
                    capability = capability.as_str(),
                    error_kind = err.kind(),
                    "upstream call failed"
                );
                Err(AppError::from(err))
            }
        }
    } else {
        Err(AppError::not_implemented(capability, mode))
    };

    let latency_ms = start.elapsed().as_millis();
    let status = match &result {
        Ok(resp) => resp.status().as_u16(),
        Err(err) => err.status.as_u16(),
    };

    let mut span = start_trace_span(&request_id, capability, mode, route, &url);
    span.set_attribute(KeyValue::new("http.status_code", status as i64));

    match &result {
        Ok(_) => {
            state.metrics.latency_ms.record(
                latency_ms as f64,
                &[KeyValue::new("capability", capability.as_str())],
            );
            info!(
                request_id = %request_id,
                capability = capability.as_str(),
                route = %route,
                upstream_url = %url,
                latency_ms = latency_ms,
                status = status,
                "request completed"
            );
        }
        Err(err) => {
            state
                .metrics
                .errors
                .add(1, &[KeyValue::new("type", err.error_type)]);
            span.set_attribute(KeyValue::new("error.type", err.error_type));
            log_error(&request_id, capability, mode, route, latency_ms, err);
        }
    }
    span.end();

    if let (Some(logger), Some(ctx)) = (state.audit_logger.as_ref(), audit) {
        let error = result.as_ref().err().map(|err| err.message.clone());
        logger.push(ctx.finish(status, error)).await;
    }

    result
}

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> String {
    let seq = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("req-{}-{}", now_ms(), seq)
}

fn log_error(
    request_id: &str,
    capability: Capability,
    mode: Mode,
    route: &str,
    latency_ms: u128,
    err: &AppError,
) {
    info!(
        request_id = %request_id,
        capability = capability.as_str(),
        mode = mode.as_str(),
        route = %route,
        latency_ms = latency_ms,
        status = err.status.as_u16(),
        error_type = err.error_type,
        message = %err.message,
        "request failed"
    );
}

fn start_trace_span(
    request_id: &str,
    capability: Capability,
    mode: Mode,
    route: &str,
    upstream_url: &str,
) -> opentelemetry::global::BoxedSpan {
    let tracer = global::tracer("unified-gateway");
    let mut span = tracer.start("unified.gateway.forward");
    span.set_attribute(KeyValue::new("request.id", request_id.to_string()));
    span.set_attribute(KeyValue::new("capability", capability.as_str()));
    span.set_attribute(KeyValue::new("mode", mode.as_str()));
    span.set_attribute(KeyValue::new("http.route", route.to_string()));
    span.set_attribute(KeyValue::new("upstream.url", upstream_url.to_string()));
    span
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{closed_upstream, config_with, spawn_upstream, state_with};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tower::ServiceExt;

    const FORWARD_PATHS: [(&str, &str); 5] = [
        ("/auth/telegram", "UNIFIED_AUTH_MODE"),
        ("/ai/chat", "UNIFIED_AI_MODE"),
        ("/api/chat", "UNIFIED_AI_MODE"),
        ("/rag/query", "UNIFIED_RAG_MODE"),
        ("/query", "UNIFIED_RAG_MODE"),
    ];

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = app.oneshot(request).await.expect("router call");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.expect("body").to_bytes();
        (status, headers, body)
    }

    fn post_json(path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request")
    }

    fn json_of(body: &Bytes) -> Value {
        serde_json::from_slice(body).expect("parse json")
    }

    /// Upstream exposing every forwarding target; records which path was hit
    /// and echoes the forwarded `x-api-key`.
    async fn recording_upstream() -> (String, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = seen.clone();
            move |uri: Uri, headers: HeaderMap| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(uri.path().to_string());
                    let key = headers
                        .get("x-api-key")
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.to_string());
                    Json(json!({ "ok": true, "path": uri.path(), "key": key }))
                }
            }
        };
        let app = Router::new()
            .route("/auth/telegram", post(handler.clone()))
            .route("/api/chat", post(handler.clone()))
            .route("/query", post(handler));
        let base = spawn_upstream(app).await;
        (base, seen)
    }

    fn upstream_env(base: &str) -> Vec<(&'static str, String)> {
        vec![
            ("BOT_BASE_URL", base.to_string()),
            ("AI_BASE_URL", base.to_string()),
            ("RAG_BASE_URL", base.to_string()),
        ]
    }

    fn app_for(base: &str, extra: &[(&str, &str)]) -> Router {
        let owned = upstream_env(base);
        let mut pairs: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (*k, v.as_str())).collect();
        pairs.extend_from_slice(extra);
        router(state_with(config_with(&pairs)))
    }

    #[tokio::test]
    async fn non_forward_mode_returns_not_implemented() {
        let base = closed_upstream().await;
        for (path, env) in FORWARD_PATHS {
            for mode in ["local", "shadow"] {
                let app = app_for(&base, &[(env, mode)]);
                let (status, _, body) = send(app, post_json(path, json!({ "anything": 1 }))).await;
                assert_eq!(status, StatusCode::NOT_IMPLEMENTED, "{} {}", path, mode);
                assert_eq!(
                    json_of(&body)["detail"],
                    format!("{}={} is not implemented yet", env, mode)
                );
            }
        }
    }

    #[tokio::test]
    async fn global_mode_gates_every_route() {
        let base = closed_upstream().await;
        let app = app_for(&base, &[("UNIFIED_MODE", "shadow")]);
        for (path, _) in FORWARD_PATHS {
            let request = Request::builder()
                .method("POST")
                .uri(path)
                .body(Body::empty())
                .expect("build request");
            let (status, _, _) = send(app.clone(), request).await;
            assert_eq!(status, StatusCode::NOT_IMPLEMENTED, "{}", path);
        }
    }

    #[tokio::test]
    async fn aliases_forward_to_the_same_upstream_path() {
        let (base, seen) = recording_upstream().await;
        let app = app_for(&base, &[]);

        for (path, expected) in [
            ("/auth/telegram", "/auth/telegram"),
            ("/ai/chat", "/api/chat"),
            ("/api/chat", "/api/chat"),
            ("/rag/query", "/query"),
            ("/query", "/query"),
        ] {
            let (status, _, body) = send(app.clone(), post_json(path, json!({ "message": "hello" }))).await;
            assert_eq!(status, StatusCode::OK, "{}", path);
            assert_eq!(json_of(&body)["path"], expected);
        }

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec!["/auth/telegram", "/api/chat", "/api/chat", "/query", "/query"]
        );
    }

    #[tokio::test]
    async fn large_bodies_reach_the_upstream() {
        let app = Router::new()
            .route(
                "/api/chat",
                post(|body: Bytes| async move { Json(json!({ "len": body.len() })) }),
            )
            .layer(DefaultBodyLimit::disable());
        let base = spawn_upstream(app).await;

        let payload = vec![b'x'; 3 * 1024 * 1024];
        let request = Request::builder()
            .method("POST")
            .uri("/ai/chat")
            .header("content-type", "text/plain")
            .body(Body::from(payload))
            .expect("build request");
        let (status, _, body) = send(app_for(&base, &[]), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["len"], 3 * 1024 * 1024);
    }

    #[tokio::test]
    async fn json_upstream_body_is_returned_decoded() {
        let app = Router::new().route(
            "/api/chat",
            post(|| async { Json(json!({ "ok": true })) }),
        );
        let base = spawn_upstream(app).await;
        let (status, headers, body) = send(app_for(&base, &[]), post_json("/ai/chat", json!({ "message": "hello" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
        assert_eq!(json_of(&body), json!({ "ok": true }));
    }

    #[tokio::test]
    async fn non_json_upstream_status_and_body_pass_through() {
        let app = Router::new().route(
            "/query",
            post(|| async { (StatusCode::IM_A_TEAPOT, [("content-type", "text/csv")], "a,b\n1,2\n") }),
        );
        let base = spawn_upstream(app).await;
        let (status, headers, body) = send(app_for(&base, &[]), post_json("/query", json!({}))).await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
        assert_eq!(headers.get("content-type").unwrap(), "text/csv");
        assert_eq!(body, Bytes::from_static(b"a,b\n1,2\n"));
    }

    #[tokio::test]
    async fn upstream_timeout_maps_to_gateway_timeout() {
        let app = Router::new().route(
            "/api/chat",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "late": true }))
            }),
        );
        let base = spawn_upstream(app).await;
        let gateway = app_for(&base, &[("UNIFIED_FORWARD_TIMEOUT_SECONDS", "0.2")]);
        let (status, _, body) = send(gateway, post_json("/api/chat", json!({}))).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        let detail = json_of(&body)["detail"].as_str().expect("detail").to_string();
        assert!(detail.starts_with("Upstream timeout:"), "{}", detail);
    }

    #[tokio::test]
    async fn refused_upstream_maps_to_bad_gateway() {
        let base = closed_upstream().await;
        let (status, _, body) = send(app_for(&base, &[]), post_json("/auth/telegram", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let detail = json_of(&body)["detail"].as_str().expect("detail").to_string();
        assert!(detail.starts_with("Upstream request failed:"), "{}", detail);
    }

    #[tokio::test]
    async fn invalid_upstream_json_is_internal_error() {
        let app = Router::new().route(
            "/query",
            post(|| async { ([("content-type", "application/json")], "{not json") }),
        );
        let base = spawn_upstream(app).await;
        let (status, _, _) = send(app_for(&base, &[]), post_json("/rag/query", json!({}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn inner_key_is_injected_unless_caller_sends_one() {
        let (base, _) = recording_upstream().await;
        let app = app_for(&base, &[("INNER_CALLS_KEY", "inner-secret")]);

        let (_, _, body) = send(app.clone(), post_json("/ai/chat", json!({}))).await;
        assert_eq!(json_of(&body)["key"], "inner-secret");

        let request = Request::builder()
            .method("POST")
            .uri("/ai/chat")
            .header("x-api-key", "caller-key")
            .body(Body::from("{}"))
            .expect("build request");
        let (_, _, body) = send(app, request).await;
        assert_eq!(json_of(&body)["key"], "caller-key");
    }

    #[tokio::test]
    async fn forwarding_routes_reject_get() {
        let base = closed_upstream().await;
        let request = Request::builder()
            .method("GET")
            .uri("/ai/chat")
            .body(Body::empty())
            .expect("build request");
        let (status, _, _) = send(app_for(&base, &[]), request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn health_reports_modes_and_routes_without_upstream() {
        let base = closed_upstream().await;
        let app = app_for(&base, &[("UNIFIED_MODE", "shadow"), ("UNIFIED_AI_MODE", "forward")]);
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("build request");
        let (status, _, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        let payload = json_of(&body);
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["service"], "unified");
        assert_eq!(payload["mode"], "shadow");
        assert_eq!(payload["route_modes"]["ai"], "forward");
        assert_eq!(payload["route_modes"]["wallet"], "shadow");
        assert_eq!(payload["routes"]["auth_telegram"], "/auth/telegram");
        assert_eq!(payload["routes"]["ai_chat"], json!(["/ai/chat", "/api/chat"]));
        assert_eq!(payload["routes"]["rag_query"], json!(["/rag/query", "/query"]));
    }

    #[tokio::test]
    async fn ready_reports_mode() {
        let base = closed_upstream().await;
        let request = Request::builder()
            .uri("/ready")
            .body(Body::empty())
            .expect("build request");
        let (status, _, body) = send(app_for(&base, &[]), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json_of(&body),
            json!({ "status": "ready", "service": "unified", "mode": "forward" })
        );
    }
}
