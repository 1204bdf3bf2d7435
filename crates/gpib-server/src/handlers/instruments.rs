//! Instrument registry CRUD handlers.

use super::{json_body, parse_id, ApiResult};
use crate::server::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use gpib_core::{Instrument, InstrumentPatch};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Instrument>>> {
    let instruments = state.api.list_instruments().await?;
    debug!("Listing {} instruments", instruments.len());
    Ok(Json(instruments))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Instrument>> {
    let id = parse_id(&raw_id)?;
    Ok(Json(state.api.get_instrument(id).await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Instrument>)> {
    let patch = InstrumentPatch::from_json(&json_body(payload)?)?;
    let instrument = state.api.create_instrument(patch).await?;
    Ok((StatusCode::CREATED, Json(instrument)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Instrument>> {
    let id = parse_id(&raw_id)?;
    let patch = InstrumentPatch::from_json(&json_body(payload)?)?;
    let instrument = state.api.update_instrument(id, patch).await?;
    debug!("Updated instrument {}", id);
    Ok(Json(instrument))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&raw_id)?;
    state.api.delete_instrument(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
