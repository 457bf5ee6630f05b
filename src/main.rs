//! # Courier — self-hosted WhatsApp message scheduling service
//!
//! Usage:
//!   courier                          # Start with ~/.courier/config.toml
//!   courier --config courier.toml   # Explicit config file
//!   courier --port 8080             # Gateway port override
//!   courier --verbose               # Debug logging

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use courier_channels::WhatsAppBridgeChannel;
use courier_core::CourierConfig;
use courier_core::traits::Channel;
use courier_scheduler::{DispatchEngine, MessageStore, RetryPolicy};

#[derive(Parser)]
#[command(
    name = "courier",
    version,
    about = "📨 Courier — schedule WhatsApp messages for later delivery"
)]
struct Cli {
    /// Path to config file (default: ~/.courier/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Message storage file override
    #[arg(long)]
    storage: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "courier=debug,courier_scheduler=debug,courier_channels=debug,courier_gateway=debug,tower_http=debug"
    } else {
        "courier=info,courier_scheduler=info,courier_channels=info,courier_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    // Load config with CLI overrides
    let mut config = match &cli.config {
        Some(path) => CourierConfig::load_from(Path::new(path))?,
        None => CourierConfig::load()?,
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(storage) = cli.storage {
        config.storage.path = storage;
    }

    tracing::info!("📨 Courier v{}", env!("CARGO_PKG_VERSION"));

    // Explicitly constructed components, injected into the engine.
    let store = MessageStore::open(Path::new(&config.storage.path));

    let channel = Arc::new(WhatsAppBridgeChannel::new(
        config.whatsapp.clone(),
        config.retry.connect_max_attempts,
        Duration::from_millis(config.retry.connect_retry_delay_ms),
    ));

    // Initial connect is best-effort: the watcher keeps polling the bridge,
    // and the engine re-checks readiness before every send anyway.
    if let Err(e) = channel.connect().await {
        tracing::warn!("⚠️ WhatsApp bridge not ready yet: {e}");
    }
    channel.spawn_watcher();

    let engine = DispatchEngine::new(
        store,
        Arc::clone(&channel) as Arc<dyn Channel>,
        RetryPolicy {
            max_attempts: config.retry.send_max_attempts,
            delay: Duration::from_millis(config.retry.send_retry_delay_ms),
        },
    );
    engine.start()?;

    let state = courier_gateway::AppState {
        engine: Arc::clone(&engine),
        channel: channel as Arc<dyn Channel>,
        start_time: std::time::Instant::now(),
    };
    courier_gateway::start(&config.gateway, state).await?;

    // Gateway returned: shutdown signal received.
    engine.shutdown();
    Ok(())
}
