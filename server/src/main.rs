//! Booking gate server.
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run server
//! cargo run --bin ketuk-server
//! ```

use ketuk_server::{Application, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ketuk=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Ketuk booking gate...");

    let config = Config::from_env()?;
    tracing::info!(
        redpanda = %config.redpanda.brokers,
        queue = %config.redpanda.queue,
        timezone = %config.gate.timezone,
        tick_secs = config.gate.tick_secs,
        "Configuration loaded"
    );

    let app = Application::build(config).await?;
    app.run().await
}
