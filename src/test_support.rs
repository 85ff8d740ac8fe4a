use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use crate::config::Config;
use crate::metrics::init_metrics_noop;
use crate::state::AppState;

/// Serves `app` on an ephemeral loopback port and returns its base url.
pub async fn spawn_upstream(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

/// Base url of a loopback port nobody is listening on.
pub async fn closed_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{}", addr)
}

pub fn config_with(pairs: &[(&str, &str)]) -> Config {
    let kv: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_kv(&kv).expect("test config")
}

pub fn state_with(config: Config) -> AppState {
    let inflight_count = Arc::new(AtomicU64::new(0));
    AppState::new(config, init_metrics_noop(inflight_count.clone()), inflight_count, None)
        .expect("test state")
}
