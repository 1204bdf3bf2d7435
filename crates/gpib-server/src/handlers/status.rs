//! Banner, health and capability handlers.

use crate::server::AppState;
use axum::{extract::State, Json};
use gpib_core::config::AppConfig;
use gpib_core::{CapabilitySummary, HealthStatus};
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn banner(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut body = json!({
        "message": AppConfig::APP_NAME,
        "version": AppConfig::VERSION,
        "status": "running",
    });
    if let Some(url) = &state.api_base_url {
        body["apiBaseUrl"] = json!(url);
    }
    Json(body)
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    Json(state.api.health().await)
}

pub async fn capabilities(State(state): State<Arc<AppState>>) -> Json<Vec<CapabilitySummary>> {
    Json(state.api.capabilities())
}
