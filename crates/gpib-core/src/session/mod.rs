//! Instrument session controller and its transport seam.

mod controller;
pub mod quantize;
mod transport;

pub use controller::SessionController;
pub use transport::{InstrumentTransport, SimulatedTransport};
