//! MathArena server entry point.

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use matharena::app::ArenaApp;
use matharena::storage::config::load_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting MathArena v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("failed to load configuration")?;
    tracing::info!("Data directory: {}", config.data_dir.display());

    let app = ArenaApp::new(config).context("failed to initialise the arena")?;
    app.run().await.context("arena server failed")?;
    Ok(())
}
