//! Webhook server command.

use anyhow::Result;
use std::sync::Arc;

use crate::adapters::http;
use crate::domain::models::Config;
use crate::services::orchestrator::Orchestrator;
use crate::services::router::WebhookRouter;

pub async fn handle_serve(orchestrator: Arc<Orchestrator>, config: &Config) -> Result<()> {
    let fallback_secret = std::env::var(&config.webhook.secret_env).ok();
    if fallback_secret.is_none() {
        tracing::info!(
            env = %config.webhook.secret_env,
            "No env-wide webhook secret; repos must configure their own"
        );
    }

    let router = Arc::new(WebhookRouter::new(
        orchestrator,
        config.webhook_triggers.clone(),
        fallback_secret,
    ));

    http::serve(router, &config.webhook.host, config.webhook.port).await?;
    Ok(())
}
