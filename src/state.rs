use crate::audit_log::AuditLogger;
use crate::config::Config;
use crate::forward::build_client;
use crate::metrics::Metrics;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};

#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub config: Arc<Config>,
    pub inflight_count: Arc<AtomicU64>,
    pub metrics: Metrics,
    pub audit_logger: Option<AuditLogger>,
}

impl AppState {
    pub fn new(
        config: Config,
        metrics: Metrics,
        inflight_count: Arc<AtomicU64>,
        audit_logger: Option<AuditLogger>,
    ) -> reqwest::Result<Self> {
        let client = build_client(config.connect_timeout(), config.forward_timeout())?;
        Ok(Self {
            client,
            config: Arc::new(config),
            inflight_count,
            metrics,
            audit_logger,
        })
    }
}

pub struct InflightGuard {
    counter: Arc<AtomicU64>,
}

impl InflightGuard {
    pub fn new(counter: Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
