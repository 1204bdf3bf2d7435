//! Data models shared by the store, the session controller and the REST layer.

mod instrument;
mod session;

pub use instrument::{
    Instrument, InstrumentConfig, InstrumentId, InstrumentPatch, MeasurementRange,
    MeasurementType, ParseValueError, Resolution,
};
pub use session::{
    ConnectionState, ConnectionTestReport, HealthStatus, ManagerStatus, Reading, SessionState,
};
