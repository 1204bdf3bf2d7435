//! Connect / measure lifecycle handlers.
//!
//! These take no request body; the instrument's stored configuration drives
//! every transport call.

use super::{parse_id, ApiResult};
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use gpib_core::{ConnectionTestReport, Reading, SessionState};
use std::sync::Arc;

pub async fn state(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<SessionState>> {
    let id = parse_id(&raw_id)?;
    Ok(Json(state.api.session_state(id).await?))
}

pub async fn connect(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<SessionState>> {
    let id = parse_id(&raw_id)?;
    Ok(Json(state.api.connect(id).await?))
}

pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<SessionState>> {
    let id = parse_id(&raw_id)?;
    Ok(Json(state.api.disconnect(id).await?))
}

pub async fn measure(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Reading>> {
    let id = parse_id(&raw_id)?;
    Ok(Json(state.api.measure(id).await?))
}

/// Round-trip connection check. Transport failures are reported in the body, not as an
/// HTTP error.
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<ConnectionTestReport>> {
    let id = parse_id(&raw_id)?;
    Ok(Json(state.api.test_connection(id).await?))
}
