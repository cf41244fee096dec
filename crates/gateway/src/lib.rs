//! HTTP surface of the chatrelay bridge.
//!
//! Endpoints:
//! - `GET /`, `GET /health`: liveness
//! - `GET /diag`: configuration flags (secrets as set/unset only)
//! - `POST /chat`: one chat call through the orchestrator
//! - `POST /memory/clear`: forget a session
//! - `GET /memory/export`: recent history of a session
//!
//! Built on Axum. Every response is JSON.

pub mod bootstrap;
pub mod rate_limit;
mod routes;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, header};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use chatrelay_config::AppConfig;
use chatrelay_engine::ChatOrchestrator;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

pub use bootstrap::{build_orchestrator, open_store};
pub use rate_limit::RateLimiter;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<ChatOrchestrator>,
    /// Startup snapshot, reported by `/diag`
    pub config: AppConfig,
    pub limiter: RateLimiter,
}

impl GatewayState {
    pub fn new(orchestrator: Arc<ChatOrchestrator>, config: AppConfig) -> Self {
        let limiter = RateLimiter::from_millis(config.gateway.rate_limit_window_ms);
        Self {
            orchestrator,
            config,
            limiter,
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let chat = Router::new()
        .route("/chat", post(routes::chat_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            routes::client_middleware,
        ));

    Router::new()
        .route("/", get(routes::health_handler))
        .route("/health", get(routes::health_handler))
        .route("/diag", get(routes::diag_handler))
        .route("/memory/clear", post(routes::memory_clear_handler))
        .route("/memory/export", get(routes::memory_export_handler))
        .merge(chat)
        .fallback(routes::not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let orchestrator = Arc::new(build_orchestrator(&config).await?);
    let state = Arc::new(GatewayState::new(orchestrator, config));
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
