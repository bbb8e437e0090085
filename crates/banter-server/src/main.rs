//! # Banter Server
//!
//! Realtime chat messaging server: rooms, private conversations, and
//! per-user notification feeds over WebSockets.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! banter
//!
//! # Run with custom config
//! banter  # reads banter.toml from the usual locations
//!
//! # Run with environment variables
//! BANTER_PORT=8080 BANTER_HOST=0.0.0.0 banter
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;
mod notify;
mod session;
mod store;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Banter server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
