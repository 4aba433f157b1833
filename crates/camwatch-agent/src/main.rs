//! camwatch-agent: camera agent binary

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use camwatch_agent::{AgentConfig, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting camwatch-agent");

    // Load configuration
    let config = AgentConfig::load_from(&cli)?;
    info!(
        listen_addr = %config.listen_addr,
        source = ?config.source,
        cooldown_frames = config.cooldown_frames,
        "Configuration loaded"
    );

    if let Err(e) = camwatch_agent::run(config).await {
        error!("Agent error: {:#}", e);
        return Err(e);
    }

    Ok(())
}
