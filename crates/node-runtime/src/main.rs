//! # Capability Wiring Node
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (`CW_CONFIG` file, then `CW_*` overrides)
//! 2. Install tracing
//! 3. Start the reconcile loop
//! 4. On Ctrl+C: stop the loop, then tear down all wiring

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use node_runtime::{init_logging, NodeConfig, NodeRuntime, CONFIG_PATH_ENV};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let config =
        NodeConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    init_logging(&config.log_level, config.json_logs).context("Failed to initialise logging")?;

    info!("===========================================");
    info!("  Capability Wiring Node v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");
    info!(peer = %config.peer_id, "Local peer identity");

    let runtime = Arc::new(NodeRuntime::new(config));
    let looping = Arc::clone(&runtime);
    let reconcile = tokio::spawn(async move { looping.run().await });

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Initiating graceful shutdown...");
    runtime.request_shutdown();
    reconcile.await.context("Reconcile loop panicked")?;
    runtime.close().await.context("Failed to stop capability wiring")?;

    info!("Shutdown complete");
    Ok(())
}
