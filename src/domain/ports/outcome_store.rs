//! Task outcome store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskOutcome;

/// Append-only outcome log. Never consulted by task-state logic.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    async fn record(&self, outcome: &TaskOutcome) -> DomainResult<()>;

    async fn list_for_task(&self, task_id: &str) -> DomainResult<Vec<TaskOutcome>>;
}
