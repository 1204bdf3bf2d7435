//! GPIB Core - headless instrument registry and session model.
//!
//! This crate provides the persistent catalogue of bench instruments and the
//! transient connect/measure lifecycle around it. It can be used
//! programmatically without any HTTP layer; see the `gpib-server` crate for
//! the REST surface.
//!
//! # Example
//!
//! ```rust,ignore
//! use gpib_core::{GpibApi, InstrumentPatch};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> gpib_core::Result<()> {
//!     let api = GpibApi::new("sqlite://gpib_control.db")?;
//!
//!     let patch = InstrumentPatch::from_json(&json!({
//!         "name": "DMM1",
//!         "type": "34401A",
//!         "gpibAddress": 22
//!     }))?;
//!     let dmm = api.create_instrument(patch).await?;
//!
//!     api.connect(dmm.id).await?;
//!     let reading = api.measure(dmm.id).await?;
//!     println!("{} {}", reading.value, reading.unit);
//!
//!     Ok(())
//! }
//! ```

pub mod capability;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod store;

mod api;

pub use api::GpibApiBuilder;
pub use capability::{
    AddressRule, CapabilityDescriptor, CapabilityRegistry, CapabilitySummary, SimulationOptions,
    SimulationProfile,
};
pub use error::{FieldError, GpibError, Result};
pub use models::{
    ConnectionState, ConnectionTestReport, HealthStatus, Instrument, InstrumentConfig,
    InstrumentId, InstrumentPatch, ManagerStatus, MeasurementRange, MeasurementType, Reading,
    Resolution, SessionState,
};
pub use session::{InstrumentTransport, SessionController, SimulatedTransport};
pub use store::InstrumentStore;

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use api::locks::IdLocks;

/// Main entry point for instrument registry and session operations.
///
/// Composes the instrument store, the capability registry and the session
/// controller. Every operation on a given instrument id runs under that id's
/// lock, so a concurrent delete and measure on the same instrument cannot
/// interleave. Operations on different ids proceed independently.
pub struct GpibApi {
    store: InstrumentStore,
    sessions: SessionController,
    registry: Arc<CapabilityRegistry>,
    locks: IdLocks,
}

impl GpibApi {
    /// Open an API over the given database with the built-in simulated models.
    pub fn new(database_url: &str) -> Result<Self> {
        Self::builder().database_url(database_url).build()
    }

    pub fn builder() -> GpibApiBuilder {
        GpibApiBuilder::new()
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    // ========================================
    // Instrument store
    // ========================================

    pub async fn list_instruments(&self) -> Result<Vec<Instrument>> {
        self.store.list()
    }

    pub async fn get_instrument(&self, id: InstrumentId) -> Result<Instrument> {
        let _guard = self.locks.acquire(id).await;
        self.store.get(id)
    }

    pub async fn create_instrument(&self, patch: InstrumentPatch) -> Result<Instrument> {
        let instrument = self.store.create(patch)?;
        info!(
            "Registered instrument {} ({}, {} at address {})",
            instrument.id,
            instrument.name(),
            instrument.model(),
            instrument.config.gpib_address
        );
        Ok(instrument)
    }

    pub async fn update_instrument(
        &self,
        id: InstrumentId,
        patch: InstrumentPatch,
    ) -> Result<Instrument> {
        let _guard = self.locks.acquire(id).await;
        self.store.update(id, patch)
    }

    /// Delete an instrument and tear down its session.
    pub async fn delete_instrument(&self, id: InstrumentId) -> Result<()> {
        let _guard = self.locks.acquire(id).await;
        let instrument = self.store.get(id)?;
        self.store.delete(id)?;

        if self.sessions.is_connected(id).await {
            if let Err(e) = self.sessions.disconnect(&instrument).await {
                warn!("Closing deleted instrument {} failed: {}", id, e);
            }
        }
        // Covers a close that failed before the session was removed.
        self.sessions.drop_session(id).await;

        info!("Removed instrument {}", id);
        Ok(())
    }

    // ========================================
    // Sessions
    // ========================================

    pub async fn connect(&self, id: InstrumentId) -> Result<SessionState> {
        let _guard = self.locks.acquire(id).await;
        let instrument = self.store.get(id)?;
        self.sessions.connect(&instrument).await
    }

    pub async fn disconnect(&self, id: InstrumentId) -> Result<SessionState> {
        let _guard = self.locks.acquire(id).await;
        let instrument = self.store.get(id)?;
        self.sessions.disconnect(&instrument).await
    }

    pub async fn measure(&self, id: InstrumentId) -> Result<Reading> {
        let _guard = self.locks.acquire(id).await;
        let instrument = self.store.get(id)?;
        self.sessions.measure(&instrument).await
    }

    pub async fn test_connection(&self, id: InstrumentId) -> Result<ConnectionTestReport> {
        let _guard = self.locks.acquire(id).await;
        let instrument = self.store.get(id)?;
        self.sessions.test_connection(&instrument).await
    }

    pub async fn session_state(&self, id: InstrumentId) -> Result<SessionState> {
        let _guard = self.locks.acquire(id).await;
        self.store.get(id)?;
        Ok(self.sessions.state(id).await)
    }

    /// Connect every instrument flagged `autoConnect`.
    ///
    /// Failures are logged and skipped; the returned states cover the
    /// instruments that connected.
    pub async fn auto_connect_all(&self) -> Result<Vec<SessionState>> {
        let mut connected = Vec::new();
        for instrument in self.store.list_auto_connect()? {
            match self.connect(instrument.id).await {
                Ok(state) => connected.push(state),
                Err(e) => warn!(
                    "Auto-connect failed for instrument {} ({}): {}",
                    instrument.id,
                    instrument.name(),
                    e
                ),
            }
        }
        Ok(connected)
    }

    // ========================================
    // Status
    // ========================================

    /// Liveness report. A failing store degrades the report instead of
    /// failing it.
    pub async fn health(&self) -> HealthStatus {
        let (status, instrument_count) = match self.store.count() {
            Ok(count) => ("healthy", Some(count)),
            Err(e) => {
                warn!("Health check could not count instruments: {}", e);
                ("degraded", None)
            }
        };
        HealthStatus {
            status: status.to_string(),
            version: config::AppConfig::VERSION.to_string(),
            timestamp: Utc::now(),
            instrument_count,
            gpib_manager_status: self.sessions.status().await,
        }
    }

    pub fn capabilities(&self) -> Vec<CapabilitySummary> {
        self.registry.summaries()
    }
}
