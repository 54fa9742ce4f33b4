//! Processed-event store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// De-duplication log for external stimuli (webhooks and poll hits).
///
/// Uniqueness is enforced on (event_id, repo_id, action); duplicate marks
/// are silently dropped.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn is_processed(&self, event_id: &str, repo_id: &str, action: &str) -> DomainResult<bool>;

    async fn mark_processed(&self, event_id: &str, repo_id: &str, action: &str) -> DomainResult<()>;
}
