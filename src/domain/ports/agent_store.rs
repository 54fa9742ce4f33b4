//! Agent status, mail and token accounting port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentMessage, AgentState, AgentStatus, TokenUsage};

/// Fleet status and inter-agent mail storage.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Upsert the status row for an agent type, refreshing the heartbeat.
    async fn update_status(
        &self,
        agent_id: &str,
        state: AgentState,
        current_task_id: Option<&str>,
        repo_id: Option<&str>,
    ) -> DomainResult<()>;

    async fn increment_completed(&self, agent_id: &str) -> DomainResult<()>;

    async fn list_statuses(&self) -> DomainResult<Vec<AgentStatus>>;

    /// Append a per-session usage row and add to the agent's running total.
    async fn record_token_usage(&self, usage: &TokenUsage) -> DomainResult<()>;

    async fn send_message(&self, message: &AgentMessage) -> DomainResult<()>;

    async fn unread_messages(&self, agent_id: &str) -> DomainResult<Vec<AgentMessage>>;

    async fn mark_read(&self, message_id: &str, agent_id: &str) -> DomainResult<bool>;
}
