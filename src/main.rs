mod audit_log;
mod config;
mod error;
mod forward;
mod handlers;
mod metrics;
mod models;
mod state;
#[cfg(test)]
mod test_support;
mod tracing_otlp;
mod translate;

use metrics::{init_metrics, init_metrics_noop, MetricsExporterConfig};
use tracing_otlp::{init_tracer, init_tracer_noop, spawn_tracer_watchdog, FLUSH_INTERVAL};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;
use tracing_subscriber::util::SubscriberInitExt;

use crate::audit_log::AuditLogger;
use crate::config::{Capability, Config, ExporterKind};
use crate::state::AppState;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

fn parse_level(level: &str) -> LevelFilter {
    match level {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

fn open_log_file(path: &str) -> Option<std::fs::File> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            eprintln!("log file create dir error: {}", err);
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("log file open error: {}", err);
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config error: {}", err);
            std::process::exit(1);
        }
    };
    let observability = &config.observability;

    let inflight_count = Arc::new(AtomicU64::new(0));
    let metrics_exporter = MetricsExporterConfig {
        kind: observability.exporters.metrics,
        endpoint: if observability.exporters.metrics == ExporterKind::LangfuseHttp {
            observability.otlp_http.metrics_endpoint()
        } else {
            observability.otlp_grpc.endpoint.clone()
        },
        timeout_ms: if observability.exporters.metrics == ExporterKind::LangfuseHttp {
            observability.otlp_http.timeout_ms
        } else {
            observability.otlp_grpc.timeout_ms
        },
        public_key: observability.otlp_http.public_key.clone(),
        secret_key: observability.otlp_http.secret_key.clone(),
    };

    let metrics = match init_metrics(
        observability.service_name.clone(),
        metrics_exporter,
        inflight_count.clone(),
    ) {
        Ok(m) => m,
        Err(err) => {
            eprintln!("metrics init error (fallback to noop): {}", err);
            init_metrics_noop(inflight_count.clone())
        }
    };
    let tracer_provider = match init_tracer(observability) {
        Ok(provider) => provider,
        Err(err) => {
            eprintln!("tracing init error (fallback to noop): {}", err);
            init_tracer_noop(observability.service_name.clone())
        }
    };

    let log_level = parse_level(observability.logging.level.as_str());
    let file_writer = observability
        .logging
        .file
        .as_deref()
        .and_then(open_log_file)
        .map(Arc::new);

    let writer = match (observability.logging.stdout, file_writer) {
        (true, Some(file)) => BoxMakeWriter::new(std::io::stdout.and(file)),
        (true, None) => BoxMakeWriter::new(std::io::stdout),
        (false, Some(file)) => BoxMakeWriter::new(file),
        (false, None) => BoxMakeWriter::new(std::io::stdout),
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_filter(log_level);

    let telemetry = tracing_opentelemetry::layer();
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(telemetry)
        .init();

    tracing::info!(
        mode = config.mode.as_str(),
        bot_base_url = %config.upstreams.bot_base_url,
        ai_base_url = %config.upstreams.ai_base_url,
        rag_base_url = %config.upstreams.rag_base_url,
        forward_timeout_seconds = config.forward.timeout_seconds,
        connect_timeout_seconds = config.forward.connect_timeout_seconds,
        inner_calls_key_set = !config.inner_calls_key.is_empty(),
        "configuration resolved"
    );
    for capability in Capability::ALL {
        tracing::info!(
            capability = capability.as_str(),
            mode = config.capability_mode(capability).as_str(),
            "capability mode"
        );
    }

    let _tracer_watchdog = match observability.exporters.tracing {
        ExporterKind::None => None,
        _ => match spawn_tracer_watchdog(tracer_provider.clone(), FLUSH_INTERVAL) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(error = %err, "span flush watchdog not started");
                None
            }
        },
    };

    let audit_logger = observability
        .audit_log
        .path
        .clone()
        .map(|path| AuditLogger::new(path, observability.audit_log.max_file_bytes));

    let bind_addr = config.server.bind_addr.clone();
    let state = AppState::new(config, metrics, inflight_count, audit_logger).unwrap_or_else(|e| {
        eprintln!("client build error: {}", e);
        std::process::exit(1);
    });
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| {
            eprintln!("bind error: {}", e);
            std::process::exit(1);
        });

    tracing::info!("listening on {}", bind_addr);
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!("server error: {}", err);
        std::process::exit(1);
    }
}
