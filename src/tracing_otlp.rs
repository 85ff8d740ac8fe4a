use opentelemetry::global;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::trace::span_processor_with_async_runtime::BatchSpanProcessor;
use opentelemetry_sdk::runtime;
use std::sync::OnceLock;
use tracing::warn;
use opentelemetry_otlp::{SpanExporter, WithExportConfig, WithHttpConfig, Protocol};
use std::collections::HashMap;
use std::time::Duration;
use base64::Engine;

use crate::config::{ExporterKind, ObservabilityConfig};

pub const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Builds the tracer provider selected by `exporters.tracing`.
pub fn init_tracer(observability: &ObservabilityConfig) -> Result<SdkTracerProvider, String> {
    let service_name = observability.service_name.clone();
    match observability.exporters.tracing {
        ExporterKind::None => Ok(init_tracer_noop(service_name)),
        ExporterKind::OtlpGrpc => init_tracer_grpc(
            observability.otlp_grpc.endpoint.clone(),
            service_name,
            observability.otlp_grpc.timeout_ms,
        ),
        ExporterKind::LangfuseHttp => init_tracer_langfuse_http(
            observability.otlp_http.traces_endpoint(),
            service_name,
            observability.otlp_http.timeout_ms,
            observability.otlp_http.public_key.clone(),
            observability.otlp_http.secret_key.clone(),
        ),
    }
}

fn init_tracer_grpc(
    otlp_endpoint: String,
    service_name: String,
    otlp_timeout_ms: u64,
) -> Result<SdkTracerProvider, String> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .with_timeout(Duration::from_millis(otlp_timeout_ms))
        .build()
        .map_err(|e| format!("trace exporter init error: {}", e))?;

    Ok(batch_provider(exporter, service_name))
}

fn init_tracer_langfuse_http(
    endpoint: String,
    service_name: String,
    timeout_ms: u64,
    public_key: String,
    secret_key: String,
) -> Result<SdkTracerProvider, String> {
    let auth = base64::engine::general_purpose::STANDARD.encode(format!(
        "{}:{}",
        public_key, secret_key
    ));
    let headers = HashMap::from([(String::from("Authorization"), format!("Basic {}", auth))]);

    let exporter = SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .with_protocol(Protocol::HttpBinary)
        .with_timeout(Duration::from_millis(timeout_ms))
        .with_headers(headers)
        .build()
        .map_err(|e| format!("langfuse tracer init error: {}", e))?;

    Ok(batch_provider(exporter, service_name))
}

fn batch_provider(exporter: SpanExporter, service_name: String) -> SdkTracerProvider {
    let batch = BatchSpanProcessor::builder(exporter, runtime::Tokio).build();
    let provider = SdkTracerProvider::builder()
        .with_span_processor(batch)
        .with_resource(Resource::builder().with_service_name(service_name).build())
        .build();

    hold_tracer_provider(provider.clone());
    provider
}

pub fn init_tracer_noop(service_name: String) -> SdkTracerProvider {
    let provider = SdkTracerProvider::builder()
        .with_resource(Resource::builder().with_service_name(service_name).build())
        .build();
    hold_tracer_provider(provider.clone());
    provider
}

/// The first provider installed stays referenced for the process lifetime;
/// later calls (noop fallbacks) do not replace it.
fn hold_tracer_provider(provider: SdkTracerProvider) {
    static INSTALLED: OnceLock<SdkTracerProvider> = OnceLock::new();
    if INSTALLED.set(provider.clone()).is_ok() {
        global::set_tracer_provider(provider);
    }
}

/// Periodically force-flushes the batch processor on a dedicated thread, so a
/// wedged exporter shows up in the logs instead of silently dropping spans.
pub fn spawn_tracer_watchdog(
    provider: SdkTracerProvider,
    interval: Duration,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("otel-flush".to_string())
        .spawn(move || loop {
            std::thread::sleep(interval);
            if let Err(err) = provider.force_flush() {
                warn!(error = %err, interval_secs = interval.as_secs(), "span flush failed");
            }
        })
}
