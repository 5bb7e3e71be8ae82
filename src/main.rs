//! receiptscope - delivery-receipt timing analysis service
//!
//! Samples round-trip latency against a target at a fixed cadence and
//! classifies the device state, presence and behavioral fingerprint the
//! timing reveals.

mod analysis;
mod channel;
mod config;
mod sampler;
mod web;

use config::ServerConfig;
use sampler::ProbeRegistry;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("receiptscope=info".parse()?)
            .add_directive("tower_http=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting receiptscope on port {}...", cfg.http_port);
    tracing::info!(
        "Default channel {}, call ceiling {:?}, session retention {:?}",
        cfg.default_channel,
        cfg.call_ceiling,
        cfg.session_retention
    );

    let registry = Arc::new(
        ProbeRegistry::new(cfg.call_ceiling, cfg.session_retention).with_max_ticks(cfg.max_ticks),
    );
    registry.start_reaper().await;

    // Serve until shutdown
    let server = Server::new(cfg, registry);
    server.start().await?;

    tracing::info!("receiptscope stopped");
    Ok(())
}
