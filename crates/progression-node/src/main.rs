//! Progression Node binary
//!
//! Runs the progression engine behind an HTTP API and admin socket.

use progression_node::{NodeConfig, ProgressionDaemon};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "progression_node=info,progression_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Progression Node");

    let config = NodeConfig::from_env()?;
    let daemon = ProgressionDaemon::new(config).await?;
    daemon.run().await?;

    Ok(())
}
