//! SQLite implementation of agent status, mail and token accounting.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentMessage, AgentState, AgentStatus, MessageType, TokenUsage};
use crate::domain::ports::AgentStore;

#[derive(Clone)]
pub struct SqliteAgentStore {
    pool: SqlitePool,
}

impl SqliteAgentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentStore for SqliteAgentStore {
    async fn update_status(
        &self,
        agent_id: &str,
        state: AgentState,
        current_task_id: Option<&str>,
        repo_id: Option<&str>,
    ) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO agent_status (agent_id, repo_id, status, current_task_id, last_heartbeat)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(agent_id) DO UPDATE SET
                   repo_id = excluded.repo_id,
                   status = excluded.status,
                   current_task_id = excluded.current_task_id,
                   last_heartbeat = excluded.last_heartbeat"#,
        )
        .bind(agent_id)
        .bind(repo_id)
        .bind(state.as_str())
        .bind(current_task_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_completed(&self, agent_id: &str) -> DomainResult<()> {
        sqlx::query(
            "UPDATE agent_status SET tasks_completed = tasks_completed + 1 WHERE agent_id = ?",
        )
        .bind(agent_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_statuses(&self) -> DomainResult<Vec<AgentStatus>> {
        let rows: Vec<AgentStatusRow> =
            sqlx::query_as("SELECT * FROM agent_status ORDER BY agent_id ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_token_usage(&self, usage: &TokenUsage) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO token_usage (agent_id, session_id, input_tokens, output_tokens,
               total_tokens, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&usage.agent_id)
        .bind(&usage.session_id)
        .bind(usage.input_tokens)
        .bind(usage.output_tokens)
        .bind(usage.total_tokens)
        .bind(usage.recorded_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE agent_status SET tokens_used = tokens_used + ? WHERE agent_id = ?")
            .bind(usage.total_tokens)
            .bind(&usage.agent_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn send_message(&self, message: &AgentMessage) -> DomainResult<()> {
        let payload_json = serde_json::to_string(&message.payload)?;
        sqlx::query(
            r#"INSERT INTO agent_messages (id, from_agent, to_agent, message_type, payload, read, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&message.id)
        .bind(&message.from_agent)
        .bind(&message.to_agent)
        .bind(message.message_type.as_str())
        .bind(&payload_json)
        .bind(i64::from(message.read))
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unread_messages(&self, agent_id: &str) -> DomainResult<Vec<AgentMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM agent_messages WHERE to_agent = ? AND read = 0 ORDER BY created_at ASC",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn mark_read(&self, message_id: &str, agent_id: &str) -> DomainResult<bool> {
        let result =
            sqlx::query("UPDATE agent_messages SET read = 1 WHERE id = ? AND to_agent = ?")
                .bind(message_id)
                .bind(agent_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct AgentStatusRow {
    agent_id: String,
    repo_id: Option<String>,
    status: String,
    current_task_id: Option<String>,
    last_heartbeat: String,
    tasks_completed: i64,
    tokens_used: i64,
}

impl TryFrom<AgentStatusRow> for AgentStatus {
    type Error = DomainError;

    fn try_from(row: AgentStatusRow) -> Result<Self, Self::Error> {
        let state = AgentState::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid agent state: {}", row.status))
        })?;
        Ok(AgentStatus {
            agent_id: row.agent_id,
            repo_id: row.repo_id,
            state,
            current_task_id: row.current_task_id,
            last_heartbeat: super::parse_datetime(&row.last_heartbeat)?,
            tasks_completed: row.tasks_completed,
            tokens_used: row.tokens_used,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    from_agent: String,
    to_agent: String,
    message_type: String,
    payload: Option<String>,
    read: i64,
    created_at: String,
}

impl TryFrom<MessageRow> for AgentMessage {
    type Error = DomainError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let message_type = MessageType::from_str(&row.message_type).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid message type: {}", row.message_type))
        })?;
        Ok(AgentMessage {
            id: row.id,
            from_agent: row.from_agent,
            to_agent: row.to_agent,
            message_type,
            payload: super::parse_payload(row.payload),
            read: row.read != 0,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use serde_json::json;

    async fn setup() -> SqliteAgentStore {
        SqliteAgentStore::new(create_migrated_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_status_upsert_refreshes_heartbeat() {
        let store = setup().await;
        store.update_status("builder", AgentState::Idle, None, None).await.unwrap();
        store.update_status("builder", AgentState::Running, Some("t1"), None).await.unwrap();

        let statuses = store.list_statuses().await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, AgentState::Running);
        assert_eq!(statuses[0].current_task_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_token_usage_accumulates() {
        let store = setup().await;
        store.update_status("builder", AgentState::Idle, None, None).await.unwrap();

        let usage = TokenUsage {
            agent_id: "builder".to_string(),
            session_id: "builder_20260801_120000".to_string(),
            input_tokens: 1200,
            output_tokens: 300,
            total_tokens: 1500,
            recorded_at: Utc::now(),
        };
        store.record_token_usage(&usage).await.unwrap();
        store.record_token_usage(&usage).await.unwrap();

        let statuses = store.list_statuses().await.unwrap();
        assert_eq!(statuses[0].tokens_used, 3000);
    }

    #[tokio::test]
    async fn test_mail_drain() {
        let store = setup().await;
        let message = AgentMessage::new("pm", "builder", MessageType::Handoff, json!({"task_type": "implement_feature"}));
        store.send_message(&message).await.unwrap();

        let unread = store.unread_messages("builder").await.unwrap();
        assert_eq!(unread.len(), 1);

        assert!(store.mark_read(&message.id, "builder").await.unwrap());
        assert!(store.unread_messages("builder").await.unwrap().is_empty());
    }
}
