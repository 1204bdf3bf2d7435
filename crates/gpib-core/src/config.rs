//! Centralized configuration for the GPIB console.
//!
//! Compile-time defaults for storage, sessions and the HTTP surface. Runtime
//! overrides come from the server's CLI/environment layer.

use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "GPIB Control Framework API";
    pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
}

/// Instrument store configuration.
pub struct StoreConfig;

impl StoreConfig {
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;
    pub const DEFAULT_DATABASE_URL: &'static str = "sqlite://gpib_control.db";
    pub const SQLITE_SCHEME: &'static str = "sqlite://";
    pub const MEMORY_URLS: [&'static str; 3] = [":memory:", "sqlite::memory:", "sqlite://:memory:"];
}

/// Bus and session configuration.
pub struct SessionConfig;

impl SessionConfig {
    /// Highest GPIB primary address.
    pub const MAX_GPIB_ADDRESS: u8 = 30;

    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const MEASURE_TIMEOUT: Duration = Duration::from_secs(5);

    // Simulated bus latencies
    pub const SIMULATED_CONNECT_LATENCY: Duration = Duration::from_millis(500);
    pub const SIMULATED_DISCONNECT_LATENCY: Duration = Duration::from_millis(200);
}

/// HTTP server defaults.
pub struct ServerConfig;

impl ServerConfig {
    pub const DEFAULT_HOST: &'static str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 8000;
    pub const DEFAULT_CORS_ORIGINS: [&'static str; 2] =
        ["http://localhost:3000", "http://127.0.0.1:3000"];
}
