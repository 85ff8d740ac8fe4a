use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

pub const HEALTH_SERVICE_NAME: &str = "unified";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Forward,
    Local,
    Shadow,
}

impl Mode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "forward" => Some(Mode::Forward),
            "local" => Some(Mode::Local),
            "shadow" => Some(Mode::Shadow),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Forward => "forward",
            Mode::Local => "local",
            Mode::Shadow => "shadow",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Empty or unrecognised overrides take the fallback, never an error.
pub fn resolve_mode(candidate: Option<Mode>, fallback: Mode) -> Mode {
    candidate.unwrap_or(fallback)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Auth,
    Ai,
    Rag,
    Wallet,
    Tasks,
    Feed,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Auth,
        Capability::Ai,
        Capability::Rag,
        Capability::Wallet,
        Capability::Tasks,
        Capability::Feed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Auth => "auth",
            Capability::Ai => "ai",
            Capability::Rag => "rag",
            Capability::Wallet => "wallet",
            Capability::Tasks => "tasks",
            Capability::Feed => "feed",
        }
    }

    pub fn mode_env(&self) -> &'static str {
        match self {
            Capability::Auth => "UNIFIED_AUTH_MODE",
            Capability::Ai => "UNIFIED_AI_MODE",
            Capability::Rag => "UNIFIED_RAG_MODE",
            Capability::Wallet => "UNIFIED_WALLET_MODE",
            Capability::Tasks => "UNIFIED_TASKS_MODE",
            Capability::Feed => "UNIFIED_FEED_MODE",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RouteModes {
    pub auth: Mode,
    pub ai: Mode,
    pub rag: Mode,
    pub wallet: Mode,
    pub tasks: Mode,
    pub feed: Mode,
}

impl RouteModes {
    pub fn get(&self, capability: Capability) -> Mode {
        match capability {
            Capability::Auth => self.auth,
            Capability::Ai => self.ai,
            Capability::Rag => self.rag,
            Capability::Wallet => self.wallet,
            Capability::Tasks => self.tasks,
            Capability::Feed => self.feed,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub mode: Mode,
    pub route_modes: RouteModes,
    pub forward: ForwardConfig,
    pub upstreams: UpstreamsConfig,
    pub inner_calls_key: String,
    pub observability: ObservabilityConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Clone, Debug)]
pub struct ForwardConfig {
    pub timeout_seconds: f64,
    pub connect_timeout_seconds: f64,
}

#[derive(Clone, Debug)]
pub struct UpstreamsConfig {
    pub bot_base_url: String,
    pub ai_base_url: String,
    pub rag_base_url: String,
}

#[derive(Clone, Debug)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub logging: LoggingConfig,
    pub exporters: ExportersConfig,
    pub otlp_grpc: OtlpGrpcConfig,
    pub otlp_http: OtlpHttpConfig,
    pub audit_log: AuditLogConfig,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub stdout: bool,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stdout: true,
            file: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExporterKind {
    None,
    OtlpGrpc,
    LangfuseHttp,
}

#[derive(Clone, Debug)]
pub struct ExportersConfig {
    pub tracing: ExporterKind,
    pub metrics: ExporterKind,
}

impl Default for ExportersConfig {
    fn default() -> Self {
        Self {
            tracing: ExporterKind::None,
            metrics: ExporterKind::None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OtlpGrpcConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl Default for OtlpGrpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_otlp_endpoint(),
            timeout_ms: 3000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OtlpHttpConfig {
    pub base_url: String,
    pub public_key: String,
    pub secret_key: String,
    pub timeout_ms: u64,
}

impl Default for OtlpHttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_langfuse_http_base_url(),
            public_key: String::new(),
            secret_key: String::new(),
            timeout_ms: 5000,
        }
    }
}

impl OtlpHttpConfig {
    pub fn traces_endpoint(&self) -> String {
        format!("{}/v1/traces", self.base_url.trim_end_matches('/'))
    }

    pub fn metrics_endpoint(&self) -> String {
        format!("{}/v1/metrics", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogConfig {
    pub path: Option<String>,
    pub max_file_bytes: u64,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_file_bytes: default_audit_max_file_bytes(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            logging: LoggingConfig::default(),
            exporters: ExportersConfig::default(),
            otlp_grpc: OtlpGrpcConfig::default(),
            otlp_http: OtlpHttpConfig::default(),
            audit_log: AuditLogConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let kv: HashMap<String, String> = std::env::vars().collect();
        Self::from_kv(&kv)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, String> {
        let mode = resolve_mode(parse_mode(kv.get("UNIFIED_MODE")), Mode::Forward);
        let capability_mode =
            |capability: Capability| resolve_mode(parse_mode(kv.get(capability.mode_env())), mode);
        let route_modes = RouteModes {
            auth: capability_mode(Capability::Auth),
            ai: capability_mode(Capability::Ai),
            rag: capability_mode(Capability::Rag),
            wallet: capability_mode(Capability::Wallet),
            tasks: capability_mode(Capability::Tasks),
            feed: capability_mode(Capability::Feed),
        };

        let forward = ForwardConfig {
            timeout_seconds: parse_seconds(
                kv.get("UNIFIED_FORWARD_TIMEOUT_SECONDS"),
                30.0,
                "UNIFIED_FORWARD_TIMEOUT_SECONDS",
            )?,
            connect_timeout_seconds: parse_seconds(
                kv.get("UNIFIED_FORWARD_CONNECT_TIMEOUT_SECONDS"),
                5.0,
                "UNIFIED_FORWARD_CONNECT_TIMEOUT_SECONDS",
            )?,
        };

        let upstreams = UpstreamsConfig {
            bot_base_url: normalize_url(kv.get("BOT_BASE_URL"), "http://127.0.0.1:8080"),
            ai_base_url: normalize_url(kv.get("AI_BASE_URL"), "http://127.0.0.1:8000"),
            rag_base_url: normalize_url(kv.get("RAG_BASE_URL"), "http://127.0.0.1:8001"),
        };

        let inner_calls_key = ["INNER_CALLS_KEY", "API_KEY"]
            .iter()
            .filter_map(|key| kv.get(*key))
            .find(|value| !value.is_empty())
            .map(|value| value.trim().to_string())
            .unwrap_or_default();

        let server = ServerConfig {
            bind_addr: non_empty(kv.get("UNIFIED_BIND_ADDR")).unwrap_or_else(default_bind_addr),
        };

        let mut config = Config {
            server,
            mode,
            route_modes,
            forward,
            upstreams,
            inner_calls_key,
            observability: parse_observability(kv)?,
        };
        config.normalize()?;
        Ok(config)
    }

    pub fn auth_telegram_url(&self) -> String {
        format!("{}/auth/telegram", self.upstreams.bot_base_url)
    }

    pub fn ai_chat_url(&self) -> String {
        format!("{}/api/chat", self.upstreams.ai_base_url)
    }

    pub fn rag_query_url(&self) -> String {
        format!("{}/query", self.upstreams.rag_base_url)
    }

    pub fn capability_mode(&self, capability: Capability) -> Mode {
        self.route_modes.get(capability)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.forward.connect_timeout_seconds)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.forward.timeout_seconds)
    }

    fn normalize(&mut self) -> Result<(), String> {
        self.observability.logging.level = self.observability.logging.level.to_lowercase();
        match self.observability.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(format!("UNIFIED_LOG_LEVEL invalid: {}", other)),
        }
        Ok(())
    }
}

/// Prepends `https://` to scheme-less values and strips trailing slashes.
pub fn normalize_url(value: Option<&String>, default: &str) -> String {
    let raw = value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .trim();
    let with_scheme = if !raw.is_empty() && !raw.starts_with("http://") && !raw.starts_with("https://") {
        format!("https://{}", raw)
    } else {
        raw.to_string()
    };
    with_scheme.trim_end_matches('/').to_string()
}

fn parse_mode(value: Option<&String>) -> Option<Mode> {
    value.and_then(|v| Mode::parse(v))
}

fn parse_seconds(value: Option<&String>, default: f64, key: &str) -> Result<f64, String> {
    let Some(raw) = value else {
        return Ok(default);
    };
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{} must be a number of seconds, got {:?}", key, raw))?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("{} must be a non-negative number, got {}", key, raw))?;
    Ok(seconds)
}

fn parse_u64(value: Option<&String>, default: u64, key: &str) -> Result<u64, String> {
    match non_empty(value) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("{} must be an unsigned integer, got {:?}", key, raw)),
    }
}

fn parse_bool(value: Option<&String>, default: bool, key: &str) -> Result<bool, String> {
    match non_empty(value).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(format!("{} must be a boolean, got {:?}", key, v)),
        },
    }
}

fn parse_exporter(value: Option<&String>, key: &str) -> Result<ExporterKind, String> {
    match non_empty(value).map(|v| v.to_lowercase()) {
        None => Ok(ExporterKind::None),
        Some(v) => match v.as_str() {
            "none" => Ok(ExporterKind::None),
            "otlp_grpc" => Ok(ExporterKind::OtlpGrpc),
            "langfuse_http" => Ok(ExporterKind::LangfuseHttp),
            other => Err(format!("{} invalid: {}", key, other)),
        },
    }
}

fn parse_observability(kv: &HashMap<String, String>) -> Result<ObservabilityConfig, String> {
    let defaults = ObservabilityConfig::default();
    Ok(ObservabilityConfig {
        service_name: non_empty(kv.get("UNIFIED_SERVICE_NAME")).unwrap_or(defaults.service_name),
        logging: LoggingConfig {
            level: non_empty(kv.get("UNIFIED_LOG_LEVEL")).unwrap_or(defaults.logging.level),
            stdout: parse_bool(kv.get("UNIFIED_LOG_STDOUT"), defaults.logging.stdout, "UNIFIED_LOG_STDOUT")?,
            file: non_empty(kv.get("UNIFIED_LOG_FILE")),
        },
        exporters: ExportersConfig {
            tracing: parse_exporter(kv.get("UNIFIED_TRACING_EXPORTER"), "UNIFIED_TRACING_EXPORTER")?,
            metrics: parse_exporter(kv.get("UNIFIED_METRICS_EXPORTER"), "UNIFIED_METRICS_EXPORTER")?,
        },
        otlp_grpc: OtlpGrpcConfig {
            endpoint: non_empty(kv.get("UNIFIED_OTLP_ENDPOINT")).unwrap_or(defaults.otlp_grpc.endpoint),
            timeout_ms: parse_u64(kv.get("UNIFIED_OTLP_TIMEOUT_MS"), defaults.otlp_grpc.timeout_ms, "UNIFIED_OTLP_TIMEOUT_MS")?,
        },
        otlp_http: OtlpHttpConfig {
            base_url: non_empty(kv.get("LANGFUSE_BASE_URL")).unwrap_or(defaults.otlp_http.base_url),
            public_key: non_empty(kv.get("LANGFUSE_PUBLIC_KEY")).unwrap_or_default(),
            secret_key: non_empty(kv.get("LANGFUSE_SECRET_KEY")).unwrap_or_default(),
            timeout_ms: parse_u64(kv.get("LANGFUSE_TIMEOUT_MS"), defaults.otlp_http.timeout_ms, "LANGFUSE_TIMEOUT_MS")?,
        },
        audit_log: AuditLogConfig {
            path: non_empty(kv.get("UNIFIED_AUDIT_LOG_PATH")),
            max_file_bytes: parse_u64(
                kv.get("UNIFIED_AUDIT_LOG_MAX_FILE_BYTES"),
                defaults.audit_log.max_file_bytes,
                "UNIFIED_AUDIT_LOG_MAX_FILE_BYTES",
            )?,
        },
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn default_bind_addr() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_service_name() -> String {
    "unified-gateway".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_langfuse_http_base_url() -> String {
    "https://cloud.langfuse.com/api/public/otel".to_string()
}

fn default_audit_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}
