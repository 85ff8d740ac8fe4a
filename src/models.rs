use serde::Serialize;

use crate::config::{Mode, RouteModes};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub mode: Mode,
    pub route_modes: RouteModes,
    pub routes: HealthRoutes,
}

#[derive(Debug, Serialize)]
pub struct HealthRoutes {
    pub auth_telegram: &'static str,
    pub ai_chat: &'static [&'static str],
    pub rag_query: &'static [&'static str],
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub mode: Mode,
}
