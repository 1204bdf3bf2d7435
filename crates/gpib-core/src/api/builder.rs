//! Builder for configuring GpibApi initialization.

use std::sync::Arc;
use std::time::Duration;

use crate::api::locks::IdLocks;
use crate::capability::{CapabilityRegistry, SimulationOptions};
use crate::config::{SessionConfig, StoreConfig};
use crate::error::Result;
use crate::session::SessionController;
use crate::store::InstrumentStore;
use crate::GpibApi;

/// Builder for configuring GpibApi initialization.
///
/// # Example
///
/// ```rust,ignore
/// use gpib_core::{GpibApi, SimulationOptions};
///
/// let api = GpibApi::builder()
///     .database_url("sqlite://gpib_control.db")
///     .simulation(SimulationOptions::instant())
///     .build()?;
/// ```
pub struct GpibApiBuilder {
    database_url: String,
    registry: Option<CapabilityRegistry>,
    simulation: SimulationOptions,
    connect_timeout: Duration,
    measure_timeout: Duration,
}

impl Default for GpibApiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GpibApiBuilder {
    pub fn new() -> Self {
        Self {
            database_url: StoreConfig::DEFAULT_DATABASE_URL.to_string(),
            registry: None,
            simulation: SimulationOptions::default(),
            connect_timeout: SessionConfig::CONNECT_TIMEOUT,
            measure_timeout: SessionConfig::MEASURE_TIMEOUT,
        }
    }

    /// Connection string for the instrument store.
    ///
    /// Default: `sqlite://gpib_control.db`
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Use a custom capability registry instead of the built-in models.
    ///
    /// When set, [`simulation`](Self::simulation) has no effect.
    pub fn registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Options for the built-in simulated models.
    pub fn simulation(mut self, options: SimulationOptions) -> Self {
        self.simulation = options;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn measure_timeout(mut self, timeout: Duration) -> Self {
        self.measure_timeout = timeout;
        self
    }

    /// Open the store and assemble the API.
    pub fn build(self) -> Result<GpibApi> {
        let registry = Arc::new(
            self.registry
                .unwrap_or_else(|| CapabilityRegistry::builtin(self.simulation)),
        );
        let store = InstrumentStore::open(&self.database_url, Arc::clone(&registry))?;
        let sessions = SessionController::new(Arc::clone(&registry))
            .with_connect_timeout(self.connect_timeout)
            .with_measure_timeout(self.measure_timeout);

        Ok(GpibApi {
            store,
            sessions,
            registry,
            locks: IdLocks::default(),
        })
    }
}
