//! Agent runner command.

use anyhow::Result;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::domain::models::Config;
use crate::services::orchestrator::Orchestrator;
use crate::services::runner::AgentRunner;

pub async fn handle_runner(
    agent_id: String,
    orchestrator: Arc<Orchestrator>,
    config: Config,
) -> Result<()> {
    let mut runner = AgentRunner::new(agent_id, config, orchestrator);
    let shutdown = runner.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {e}");
            return;
        }
        tracing::info!("Shutdown signal received");
        shutdown.store(true, Ordering::SeqCst);
    });

    runner.run().await;
    Ok(())
}
