//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::sampler::ProbeRegistry;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<ProbeRegistry>,
}

/// HTTP API server.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, registry: Arc<ProbeRegistry>) -> Self {
        Self {
            state: AppState { config, registry },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            .route("/api/health", get(handlers::handle_health))
            // Probe sessions
            .route(
                "/api/probes",
                get(handlers::handle_list_probes).post(handlers::handle_start_probe),
            )
            .route(
                "/api/probes/{id}",
                get(handlers::handle_get_probe).delete(handlers::handle_delete_probe),
            )
            .route("/api/probes/{id}/cancel", post(handlers::handle_cancel_probe))
            .route(
                "/api/probes/{id}/classification",
                get(handlers::handle_probe_classification),
            )
            .route("/api/probes/{id}/presence", get(handlers::handle_probe_presence))
            .route("/api/probes/{id}/report", get(handlers::handle_probe_report))
            // Stateless analysis
            .route("/api/classify", post(handlers::handle_classify))
            .route("/api/presence", post(handlers::handle_presence))
            .route("/api/fingerprint", post(handlers::handle_fingerprint))
            .route("/api/exhaustion", post(handlers::handle_exhaustion))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(4 * 1024 * 1024)) // 4MB
            .with_state(self.state.clone())
    }

    /// Serve until ctrl-c, then cancel every running session.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.state.registry.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
