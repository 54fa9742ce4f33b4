//! SQLite implementation of the outcome store.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{OutcomeKind, TaskOutcome};
use crate::domain::ports::OutcomeStore;

#[derive(Clone)]
pub struct SqliteOutcomeStore {
    pool: SqlitePool,
}

impl SqliteOutcomeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutcomeStore for SqliteOutcomeStore {
    async fn record(&self, outcome: &TaskOutcome) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO task_outcomes (task_id, repo_id, agent_id, task_type, outcome,
               duration_seconds, error_summary, context_summary, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&outcome.task_id)
        .bind(&outcome.repo_id)
        .bind(&outcome.agent_id)
        .bind(&outcome.task_type)
        .bind(outcome.outcome.as_str())
        .bind(outcome.duration_seconds)
        .bind(&outcome.error_summary)
        .bind(&outcome.context_summary)
        .bind(outcome.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_task(&self, task_id: &str) -> DomainResult<Vec<TaskOutcome>> {
        let rows: Vec<OutcomeRow> = sqlx::query_as(
            "SELECT * FROM task_outcomes WHERE task_id = ? ORDER BY created_at ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct OutcomeRow {
    task_id: String,
    repo_id: Option<String>,
    agent_id: String,
    task_type: String,
    outcome: String,
    duration_seconds: Option<i64>,
    error_summary: Option<String>,
    context_summary: Option<String>,
    created_at: String,
}

impl TryFrom<OutcomeRow> for TaskOutcome {
    type Error = DomainError;

    fn try_from(row: OutcomeRow) -> Result<Self, Self::Error> {
        let outcome = OutcomeKind::from_str(&row.outcome).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid outcome: {}", row.outcome))
        })?;
        Ok(TaskOutcome {
            task_id: row.task_id,
            repo_id: row.repo_id,
            agent_id: row.agent_id,
            task_type: row.task_type,
            outcome,
            duration_seconds: row.duration_seconds,
            error_summary: row.error_summary,
            context_summary: row.context_summary,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}
