//! GPIB Server - REST backend for the instrument console.
//!
//! This binary wraps the gpib-core library in an HTTP API consumed by the
//! presentation layer.

mod handlers;
mod server;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use gpib_core::config::{ServerConfig, SessionConfig, StoreConfig};
use gpib_core::{GpibApi, SimulationOptions};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "gpib-server")]
#[command(about = "REST server for the GPIB instrument console")]
struct Args {
    /// Host to bind to
    #[arg(long, env = "GPIB_HOST", default_value = ServerConfig::DEFAULT_HOST)]
    host: String,

    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, env = "GPIB_PORT", default_value_t = ServerConfig::DEFAULT_PORT)]
    port: u16,

    /// Instrument store location (sqlite://path or :memory:)
    #[arg(long, env = "DATABASE_URL", default_value = StoreConfig::DEFAULT_DATABASE_URL)]
    database_url: String,

    /// Public base URL advertised by the banner
    #[arg(long, env = "API_BASE_URL")]
    api_base_url: Option<String>,

    /// Allowed CORS origin (repeatable or comma separated)
    #[arg(long = "cors-origin", env = "GPIB_CORS_ORIGINS", value_delimiter = ',')]
    cors_origins: Vec<String>,

    /// Measurement timeout in milliseconds
    #[arg(long, default_value_t = SessionConfig::MEASURE_TIMEOUT.as_millis() as u64)]
    measure_timeout_ms: u64,

    /// Connect timeout in milliseconds
    #[arg(long, default_value_t = SessionConfig::CONNECT_TIMEOUT.as_millis() as u64)]
    connect_timeout_ms: u64,

    /// Skip the simulated bus latencies
    #[arg(long)]
    no_simulated_latency: bool,

    /// Probability in [0, 1] that a simulated connect is refused
    #[arg(long, default_value_t = 0.0)]
    connect_failure_rate: f64,

    /// Do not connect autoConnect instruments at startup
    #[arg(long)]
    no_auto_connect: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_logging(debug: bool, format: LogFormat) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries the API_PORT handshake
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.log_format);

    info!("Starting GPIB server");

    let simulation = SimulationOptions::default()
        .with_latency(!args.no_simulated_latency)
        .with_connect_failure_rate(args.connect_failure_rate);

    let api = GpibApi::builder()
        .database_url(&args.database_url)
        .simulation(simulation)
        .connect_timeout(Duration::from_millis(args.connect_timeout_ms))
        .measure_timeout(Duration::from_millis(args.measure_timeout_ms))
        .build()?;

    info!("Instrument store: {}", args.database_url);

    if !args.no_auto_connect {
        match api.auto_connect_all().await {
            Ok(states) => info!("Auto-connected {} instruments", states.len()),
            Err(e) => warn!("Auto-connect skipped: {}", e),
        }
    }

    let cors_origins = if args.cors_origins.is_empty() {
        ServerConfig::DEFAULT_CORS_ORIGINS
            .iter()
            .map(|origin| origin.to_string())
            .collect()
    } else {
        args.cors_origins
    };

    let options = server::ServerOptions {
        host: args.host,
        port: args.port,
        cors_origins,
        api_base_url: args.api_base_url,
    };
    let addr = server::start_server(api, options).await?;

    // Port handshake for launchers and tests (intentional stdout)
    println!("API_PORT={}", addr.port());

    info!("REST server running on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
