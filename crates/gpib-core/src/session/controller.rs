//! Connect/disconnect/measure lifecycle over instrument transports.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::quantize::quantize;
use crate::capability::{CapabilityDescriptor, CapabilityRegistry};
use crate::config::SessionConfig;
use crate::error::{GpibError, Result};
use crate::models::{
    ConnectionState, ConnectionTestReport, Instrument, InstrumentId, ManagerStatus, Reading,
    SessionState,
};

/// Live session for a connected instrument.
#[derive(Debug, Clone)]
struct Session {
    connected_at: DateTime<Utc>,
    last_value: Option<f64>,
    last_measured_at: Option<DateTime<Utc>>,
}

impl Session {
    fn snapshot(&self, instrument_id: InstrumentId) -> SessionState {
        SessionState {
            instrument_id,
            state: ConnectionState::Connected,
            connected: true,
            last_value: self.last_value,
            connected_at: Some(self.connected_at),
            last_measured_at: self.last_measured_at,
        }
    }
}

/// Tracks which instruments are connected and proxies readings to their
/// transports.
///
/// The controller never mutates persisted configuration. Callers pass the
/// current [`Instrument`] record for operations that need it; serializing
/// operations on the same id is the caller's responsibility.
pub struct SessionController {
    registry: Arc<CapabilityRegistry>,
    sessions: RwLock<HashMap<InstrumentId, Session>>,
    connect_timeout: Duration,
    measure_timeout: Duration,
}

impl SessionController {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            sessions: RwLock::new(HashMap::new()),
            connect_timeout: SessionConfig::CONNECT_TIMEOUT,
            measure_timeout: SessionConfig::MEASURE_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_measure_timeout(mut self, timeout: Duration) -> Self {
        self.measure_timeout = timeout;
        self
    }

    fn descriptor(&self, instrument: &Instrument) -> Result<Arc<CapabilityDescriptor>> {
        self.registry
            .get(instrument.model())
            .ok_or_else(|| GpibError::Config {
                message: format!(
                    "instrument {} references unregistered model '{}'",
                    instrument.id,
                    instrument.model()
                ),
            })
    }

    /// Run a transport call under a deadline.
    async fn bounded<T>(
        id: InstrumentId,
        timeout: Duration,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GpibError::TransportTimeout { id, timeout }),
        }
    }

    /// Connect an instrument. Idempotent while connected.
    pub async fn connect(&self, instrument: &Instrument) -> Result<SessionState> {
        let id = instrument.id;
        if let Some(session) = self.sessions.read().await.get(&id) {
            debug!("Instrument {} already connected", id);
            return Ok(session.snapshot(id));
        }

        let descriptor = self.descriptor(instrument)?;
        if let Err(e) = Self::bounded(
            id,
            self.connect_timeout,
            descriptor.transport.open(instrument),
        )
        .await
        {
            warn!("Connect failed for instrument {}: {}", id, e);
            return Err(e);
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(id).or_insert_with(|| Session {
            connected_at: Utc::now(),
            last_value: None,
            last_measured_at: None,
        });
        info!(
            "Connected instrument {} ({}) at GPIB address {}",
            id,
            instrument.name(),
            instrument.config.gpib_address
        );
        Ok(session.snapshot(id))
    }

    /// Disconnect an instrument. No-op when already disconnected.
    ///
    /// The session is dropped even if the transport fails to close cleanly;
    /// the close error is still returned.
    pub async fn disconnect(&self, instrument: &Instrument) -> Result<SessionState> {
        let id = instrument.id;
        let removed = self.sessions.write().await.remove(&id);
        if removed.is_none() {
            return Ok(SessionState::disconnected(id));
        }

        let descriptor = self.descriptor(instrument)?;
        Self::bounded(
            id,
            self.connect_timeout,
            descriptor.transport.close(instrument),
        )
        .await?;

        info!("Disconnected instrument {}", id);
        Ok(SessionState::disconnected(id))
    }

    /// Take a reading from a connected instrument.
    pub async fn measure(&self, instrument: &Instrument) -> Result<Reading> {
        let id = instrument.id;
        if !self.sessions.read().await.contains_key(&id) {
            return Err(GpibError::NotConnected { id });
        }

        let descriptor = self.descriptor(instrument)?;
        let reading = self.read_once(&descriptor, instrument).await?;

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(GpibError::NotConnected { id })?;
        session.last_value = Some(reading.value);
        session.last_measured_at = Some(reading.timestamp);

        debug!(
            "Instrument {} read {} {}",
            id, reading.value, reading.unit
        );
        Ok(reading)
    }

    async fn read_once(
        &self,
        descriptor: &CapabilityDescriptor,
        instrument: &Instrument,
    ) -> Result<Reading> {
        let raw = Self::bounded(
            instrument.id,
            self.measure_timeout,
            descriptor.transport.read(instrument),
        )
        .await?;

        let config = &instrument.config;
        let (value, effective_range) = quantize(raw, config.range, config.resolution);
        Ok(Reading {
            instrument_id: instrument.id,
            value,
            unit: config.measurement_type.unit().to_string(),
            unit_label: config.measurement_type.unit_label().to_string(),
            timestamp: Utc::now(),
            measurement_type: config.measurement_type,
            range: config.range,
            effective_range,
            resolution: config.resolution,
            instrument_type: descriptor.display_name.clone(),
        })
    }

    /// Diagnostic connect/measure/disconnect round-trip.
    ///
    /// Leaves the session map untouched. When the instrument already has a
    /// live session only the read is performed, so the session's link is not
    /// torn down. Transport failures are reported in the returned report.
    pub async fn test_connection(&self, instrument: &Instrument) -> Result<ConnectionTestReport> {
        let id = instrument.id;
        let descriptor = self.descriptor(instrument)?;
        let live = self.sessions.read().await.contains_key(&id);
        let started = Instant::now();

        let outcome = if live {
            self.read_once(&descriptor, instrument).await
        } else {
            self.round_trip(&descriptor, instrument).await
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(match outcome {
            Ok(reading) => ConnectionTestReport {
                instrument_id: id,
                success: true,
                reading: Some(reading),
                error: None,
                error_kind: None,
                elapsed_ms,
            },
            Err(e) => {
                warn!("Connection test failed for instrument {}: {}", id, e);
                ConnectionTestReport {
                    instrument_id: id,
                    success: false,
                    reading: None,
                    error_kind: Some(e.kind().to_string()),
                    error: Some(e.to_string()),
                    elapsed_ms,
                }
            }
        })
    }

    async fn round_trip(
        &self,
        descriptor: &CapabilityDescriptor,
        instrument: &Instrument,
    ) -> Result<Reading> {
        let transport = &descriptor.transport;
        Self::bounded(instrument.id, self.connect_timeout, transport.open(instrument)).await?;
        let reading = self.read_once(descriptor, instrument).await;
        let closed =
            Self::bounded(instrument.id, self.connect_timeout, transport.close(instrument)).await;
        let reading = reading?;
        closed?;
        Ok(reading)
    }

    /// Forget a session without talking to the transport.
    ///
    /// Returns whether a session existed.
    pub async fn drop_session(&self, id: InstrumentId) -> bool {
        let existed = self.sessions.write().await.remove(&id).is_some();
        if existed {
            debug!("Dropped session for instrument {}", id);
        }
        existed
    }

    pub async fn state(&self, id: InstrumentId) -> SessionState {
        match self.sessions.read().await.get(&id) {
            Some(session) => session.snapshot(id),
            None => SessionState::disconnected(id),
        }
    }

    pub async fn is_connected(&self, id: InstrumentId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn status(&self) -> ManagerStatus {
        let sessions = self.sessions.read().await;
        let mut instrument_ids: Vec<_> = sessions.keys().copied().collect();
        instrument_ids.sort_unstable();
        ManagerStatus {
            connected_instruments: instrument_ids.len(),
            instrument_ids,
            available_models: self.registry.models(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::SimulationOptions;
    use crate::models::{InstrumentConfig, MeasurementRange, MeasurementType, Resolution};
    use crate::session::InstrumentTransport;
    use async_trait::async_trait;

    fn instrument(id: InstrumentId, model: &str) -> Instrument {
        let now = Utc::now();
        Instrument {
            id,
            config: InstrumentConfig {
                name: format!("DMM{}", id),
                model: model.to_string(),
                gpib_address: 22,
                description: None,
                auto_connect: false,
                measurement_type: MeasurementType::DcVoltage,
                range: MeasurementRange::Fixed10,
                resolution: Resolution::Digits6_5,
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn controller() -> SessionController {
        SessionController::new(Arc::new(CapabilityRegistry::builtin(
            SimulationOptions::instant(),
        )))
    }

    /// Transport that never answers.
    struct StalledTransport;

    #[async_trait]
    impl InstrumentTransport for StalledTransport {
        async fn open(&self, _instrument: &Instrument) -> Result<()> {
            Ok(())
        }

        async fn read(&self, _instrument: &Instrument) -> Result<f64> {
            std::future::pending().await
        }

        async fn close(&self, _instrument: &Instrument) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_measure_requires_connection() {
        let controller = controller();
        let dmm = instrument(1, "34401A");

        let err = controller.measure(&dmm).await.unwrap_err();
        assert!(matches!(err, GpibError::NotConnected { id: 1 }));

        controller.connect(&dmm).await.unwrap();
        let reading = controller.measure(&dmm).await.unwrap();
        assert_eq!(reading.unit, "V");
        assert_eq!(reading.effective_range, 10.0);
        assert_eq!(reading.instrument_type, "HP 34401A");
        assert!(reading.value.abs() <= 10.0);

        let state = controller.state(1).await;
        assert_eq!(state.last_value, Some(reading.value));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_are_idempotent() {
        let controller = controller();
        let dmm = instrument(1, "34461A");

        let first = controller.connect(&dmm).await.unwrap();
        let second = controller.connect(&dmm).await.unwrap();
        assert!(first.connected && second.connected);
        assert_eq!(first.connected_at, second.connected_at);

        assert!(!controller.disconnect(&dmm).await.unwrap().connected);
        assert!(!controller.disconnect(&dmm).await.unwrap().connected);
        assert_eq!(controller.state(1).await.state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_refused_connect_records_nothing() {
        let registry = CapabilityRegistry::builtin(
            SimulationOptions::instant().with_connect_failure_rate(1.0),
        );
        let controller = SessionController::new(Arc::new(registry));
        let dmm = instrument(4, "custom");

        let err = controller.connect(&dmm).await.unwrap_err();
        assert_eq!(err.kind(), "transport_error");
        assert!(!controller.is_connected(4).await);
    }

    #[tokio::test]
    async fn test_measure_timeout_maps_to_transport_timeout() {
        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityDescriptor::new(
            "stalled",
            "Stalled",
            Arc::new(StalledTransport),
        ));
        let controller = SessionController::new(Arc::new(registry))
            .with_measure_timeout(Duration::from_millis(20));
        let dmm = instrument(9, "stalled");

        controller.connect(&dmm).await.unwrap();
        let err = controller.measure(&dmm).await.unwrap_err();
        assert!(matches!(err, GpibError::TransportTimeout { id: 9, .. }));
        assert!(controller.is_connected(9).await);
    }

    #[tokio::test]
    async fn test_connection_test_leaves_no_session() {
        let controller = controller();
        let dmm = instrument(2, "34465A");

        let report = controller.test_connection(&dmm).await.unwrap();
        assert!(report.success);
        assert!(report.reading.is_some());
        assert!(!controller.is_connected(2).await);
    }

    #[tokio::test]
    async fn test_connection_test_reports_failure() {
        let registry = CapabilityRegistry::builtin(
            SimulationOptions::instant().with_connect_failure_rate(1.0),
        );
        let controller = SessionController::new(Arc::new(registry));
        let report = controller
            .test_connection(&instrument(3, "34410A"))
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.error_kind.as_deref(), Some("transport_error"));
    }

    #[tokio::test]
    async fn test_unregistered_model_is_config_error() {
        let controller = controller();
        let err = controller.connect(&instrument(5, "3458A")).await.unwrap_err();
        assert!(matches!(err, GpibError::Config { .. }));
    }

    #[tokio::test]
    async fn test_status_lists_connected_ids() {
        let controller = controller();
        controller.connect(&instrument(7, "34401A")).await.unwrap();
        controller.connect(&instrument(3, "34401A")).await.unwrap();

        let status = controller.status().await;
        assert_eq!(status.connected_instruments, 2);
        assert_eq!(status.instrument_ids, vec![3, 7]);
        assert_eq!(status.available_models.len(), 5);

        assert!(controller.drop_session(7).await);
        assert!(!controller.drop_session(7).await);
        assert_eq!(controller.status().await.instrument_ids, vec![3]);
    }
}
