//! Scheduler command.

use anyhow::Result;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::adapters::forge::GitLabForge;
use crate::domain::models::Config;
use crate::services::orchestrator::Orchestrator;
use crate::services::scheduler::Scheduler;

pub async fn handle_scheduler(orchestrator: Arc<Orchestrator>, config: &Config) -> Result<()> {
    let forge = Arc::new(GitLabForge::from_env());
    let mut scheduler = Scheduler::new(orchestrator, forge, config);
    let shutdown = scheduler.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {e}");
            return;
        }
        tracing::info!("Shutdown signal received");
        shutdown.store(true, Ordering::SeqCst);
    });

    scheduler.run().await;
    Ok(())
}
