//! Transient session and measurement payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::instrument::{InstrumentId, MeasurementRange, MeasurementType, Resolution};

/// Connection state of one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Snapshot of an instrument's session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub instrument_id: InstrumentId,
    pub state: ConnectionState,
    pub connected: bool,
    pub last_value: Option<f64>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_measured_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn disconnected(instrument_id: InstrumentId) -> Self {
        Self {
            instrument_id,
            state: ConnectionState::Disconnected,
            connected: false,
            last_value: None,
            connected_at: None,
            last_measured_at: None,
        }
    }
}

/// A single measurement result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub instrument_id: InstrumentId,
    pub value: f64,
    pub unit: String,
    pub unit_label: String,
    pub timestamp: DateTime<Utc>,
    pub measurement_type: MeasurementType,
    /// Configured range.
    pub range: MeasurementRange,
    /// Full scale used to quantize the value; resolved from the value under `AUTO`.
    pub effective_range: f64,
    pub resolution: Resolution,
    /// Human readable model name, e.g. `HP 34401A`.
    pub instrument_type: String,
}

/// Result of a connect/measure/disconnect diagnostic round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestReport {
    pub instrument_id: InstrumentId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading: Option<Reading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub elapsed_ms: u64,
}

/// Aggregate status of the session controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    pub connected_instruments: usize,
    pub instrument_ids: Vec<InstrumentId>,
    pub available_models: Vec<String>,
}

/// Liveness payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// `None` when the store could not be read.
    pub instrument_count: Option<usize>,
    pub gpib_manager_status: ManagerStatus,
}
