//! HTTP server implementation using Axum.

use crate::handlers::{self, instruments, sessions, status};
use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use gpib_core::GpibApi;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// Core API (instrument registry and sessions)
    pub api: GpibApi,
    /// Public base URL advertised in the banner
    pub api_base_url: Option<String>,
}

/// Listener and presentation settings.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub api_base_url: Option<String>,
}

/// Build the router with all REST routes.
pub fn router(state: Arc<AppState>, cors_origins: &[String]) -> anyhow::Result<Router> {
    let origins = cors_origins
        .iter()
        .map(|origin| origin.trim().parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(status::banner))
        .route("/api/health", get(status::health))
        .route("/api/capabilities", get(status::capabilities))
        .route(
            "/api/instruments",
            get(instruments::list).post(instruments::create),
        )
        .route(
            "/api/instruments/:id",
            get(instruments::get)
                .put(instruments::update)
                .delete(instruments::delete),
        )
        .route("/api/instruments/:id/session", get(sessions::state))
        .route("/api/instruments/:id/connect", post(sessions::connect))
        .route("/api/instruments/:id/disconnect", post(sessions::disconnect))
        .route("/api/instruments/:id/measure", post(sessions::measure))
        .route("/api/instruments/:id/test", post(sessions::test_connection))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    Ok(app)
}

/// Start the REST server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(api: GpibApi, options: ServerOptions) -> anyhow::Result<SocketAddr> {
    let state = Arc::new(AppState {
        api,
        api_base_url: options.api_base_url,
    });
    let app = router(state, &options.cors_origins)?;

    let addr: SocketAddr = format!("{}:{}", options.host, options.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
