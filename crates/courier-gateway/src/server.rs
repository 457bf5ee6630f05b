//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use courier_core::config::GatewayConfig;
use courier_core::traits::Channel;
use courier_scheduler::DispatchEngine;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DispatchEngine>,
    pub channel: Arc<dyn Channel>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/status", get(super::routes::service_status))
        .route("/api/v1/messages/send", post(super::routes::send_message))
        .route(
            "/api/v1/scheduled-messages",
            post(super::routes::schedule_message).get(super::routes::list_scheduled_messages),
        )
        .route(
            "/api/v1/scheduled-messages/bulk",
            post(super::routes::schedule_bulk),
        )
        .route(
            "/api/v1/scheduled-messages/{id}",
            get(super::routes::get_scheduled_message)
                .delete(super::routes::cancel_scheduled_message),
        )
        .layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                ])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server; returns once a shutdown signal arrives.
pub async fn start(config: &GatewayConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}
