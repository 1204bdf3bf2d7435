//! Persistent instrument records.

mod sqlite;

pub use sqlite::{DatabaseLocation, InstrumentStore};
