mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use fanout_core::{init_logging, load_config, log_config_summary};
use fanout_sfu::{InMemoryRegistry, SignalingOrchestrator, WebRtcEngine};

use server::FanoutServer;

#[derive(Parser, Debug)]
#[command(name = "fanout")]
#[command(about = "Minimal WebRTC SFU: one publisher fanned out to many viewers", long_about = None)]
struct Args {
    /// Path to a YAML/TOML config file
    #[arg(short, long, env = "FANOUT_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration (fail fast)
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    init_logging(&config.logging)?;
    info!("Fanout server starting...");
    log_config_summary(&config);

    // 3. Build the session layer
    let engine = Arc::new(
        WebRtcEngine::new(&config.sfu)
            .map_err(|e| anyhow::anyhow!("Failed to initialize WebRTC engine: {e}"))?,
    );
    let registry = Arc::new(InMemoryRegistry::new(config.sfu.selection));
    let orchestrator = Arc::new(SignalingOrchestrator::new(registry.clone(), engine));

    // 4. Run until a shutdown signal arrives
    FanoutServer::new(config, registry, orchestrator).start().await?;

    info!("Fanout server stopped");
    Ok(())
}
