use serde::Serialize;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::config::Mode;

const REDACTED_HEADERS: [&str; 2] = ["authorization", "x-api-key"];

/// Appends one JSON line per forwarded call, rotating to a fresh
/// timestamped file once `max_file_bytes` would be exceeded.
#[derive(Clone)]
pub struct AuditLogger {
    sender: mpsc::Sender<AuditLogRecord>,
}

impl AuditLogger {
    pub fn new(base_path: String, max_file_bytes: u64) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditLogRecord>(256);
        tokio::spawn(async move {
            let mut generation = 0u64;
            let mut current_path = build_log_path(&base_path, generation);
            let mut file = match open_log_file(&current_path).await {
                Ok(file) => file,
                Err(err) => {
                    tracing::error!("audit log open error: {}", err);
                    return;
                }
            };
            let mut current_size = file
                .metadata()
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            while let Some(record) = rx.recv().await {
                let Ok(mut line) = serde_json::to_string(&record) else {
                    continue;
                };
                line.push('\n');
                let projected = current_size + line.len() as u64;
                if projected > max_file_bytes && current_size > 0 {
                    generation += 1;
                    current_path = build_log_path(&base_path, generation);
                    match open_log_file(&current_path).await {
                        Ok(new_file) => {
                            file = new_file;
                            current_size = 0;
                        }
                        Err(err) => {
                            tracing::error!("audit log rotate error: {}", err);
                        }
                    }
                }
                if file.write_all(line.as_bytes()).await.is_err() || file.flush().await.is_err() {
                    tracing::error!("audit log write error");
                    continue;
                }
                current_size += line.len() as u64;
            }
        });
        Self { sender: tx }
    }

    pub async fn push(&self, record: AuditLogRecord) {
        let _ = self.sender.send(record).await;
    }
}

pub struct AuditContext {
    pub ts_start_ms: u128,
    pub request_id: String,
    pub route: String,
    pub capability: &'static str,
    pub mode: Mode,
    pub upstream_url: Option<String>,
    pub request_headers: HashMap<String, String>,
    pub request_bytes: usize,
}

impl AuditContext {
    pub fn finish(self, status: u16, error: Option<String>) -> AuditLogRecord {
        AuditLogRecord {
            ts_start_ms: self.ts_start_ms,
            ts_end_ms: now_ms(),
            request_id: self.request_id,
            route: self.route,
            capability: self.capability,
            mode: self.mode,
            method: "POST",
            upstream_url: self.upstream_url,
            request: AuditRequest {
                headers: self.request_headers,
                body_bytes: self.request_bytes,
            },
            response: AuditResponse { status, error },
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditLogRecord {
    pub ts_start_ms: u128,
    pub ts_end_ms: u128,
    pub request_id: String,
    pub route: String,
    pub capability: &'static str,
    pub mode: Mode,
    pub method: &'static str,
    pub upstream_url: Option<String>,
    pub request: AuditRequest,
    pub response: AuditResponse,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditRequest {
    pub headers: HashMap<String, String>,
    pub body_bytes: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn headers_to_map(headers: &axum::http::HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (name, value) in headers.iter() {
        if REDACTED_HEADERS.contains(&name.as_str()) {
            out.insert(name.to_string(), "[redacted]".to_string());
        } else {
            let value = value.to_str().unwrap_or("[invalid]");
            out.insert(name.to_string(), value.to_string());
        }
    }
    out
}

pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Rotations inside the same millisecond stay distinct through `generation`.
fn build_log_path(base: &str, generation: u64) -> String {
    let ts = now_ms();
    if let Some(stripped) = base.strip_suffix(".jsonl") {
        format!("{}.{}-{}.jsonl", stripped, ts, generation)
    } else {
        format!("{}.{}-{}", base, ts, generation)
    }
}

async fn open_log_file(path: &str) -> Result<tokio::fs::File, std::io::Error> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}
