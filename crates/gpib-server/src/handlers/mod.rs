//! REST handlers, split by resource.

pub mod instruments;
pub mod sessions;
pub mod status;

use axum::{
    extract::rejection::JsonRejection,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use gpib_core::{FieldError, GpibError, InstrumentId};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

// ============================================================================
// Error responses
// ============================================================================

/// Error returned from every handler.
///
/// Serialized as `{"error": kind, "message": text, "fields"?: [...], "id"?: n}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<FieldError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<InstrumentId>,
}

impl ApiError {
    fn route_not_found(uri: &Uri) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                error: "not_found",
                message: format!("No route for {}", uri.path()),
                fields: Vec::new(),
                id: None,
            },
        }
    }
}

/// HTTP status for a core error kind.
pub fn status_for(err: &GpibError) -> StatusCode {
    match err {
        GpibError::Validation { .. } => StatusCode::BAD_REQUEST,
        GpibError::NotFound { .. } => StatusCode::NOT_FOUND,
        GpibError::NotConnected { .. } => StatusCode::CONFLICT,
        GpibError::Transport { .. } => StatusCode::BAD_GATEWAY,
        GpibError::TransportTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GpibError::Database { .. }
        | GpibError::Io { .. }
        | GpibError::Json { .. }
        | GpibError::Config { .. }
        | GpibError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<GpibError> for ApiError {
    fn from(err: GpibError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            if err.is_retryable() {
                warn!("Request failed ({}): {}", err.kind(), err);
            } else {
                error!("Request failed ({}): {}", err.kind(), err);
            }
        } else {
            debug!("Request rejected ({}): {}", err.kind(), err);
        }

        Self {
            status,
            body: ErrorBody {
                error: err.kind(),
                message: err.to_string(),
                fields: err.field_errors().to_vec(),
                id: err.instrument_id(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Handler result type.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Extraction helpers
// ============================================================================

/// Parse the `{id}` path segment.
pub fn parse_id(raw: &str) -> ApiResult<InstrumentId> {
    raw.trim().parse::<InstrumentId>().map_err(|_| {
        GpibError::invalid_field("id", format!("'{}' is not an integer id", raw)).into()
    })
}

/// Unwrap a JSON body, turning malformed or missing payloads into a
/// validation error on `body`.
pub fn json_body(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => Err(GpibError::invalid_field("body", rejection.body_text()).into()),
    }
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::route_not_found(&uri)
}
