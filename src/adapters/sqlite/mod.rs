//! SQLite adapters implementing the store ports.

pub mod agent_store;
pub mod approval_store;
pub mod connection;
pub mod event_store;
pub mod migrations;
pub mod outcome_store;
pub mod repo_store;
pub mod task_store;

pub use agent_store::SqliteAgentStore;
pub use approval_store::SqliteApprovalStore;
pub use connection::{open_in_memory, StoreOpenError, StoreOptions};
pub use event_store::SqliteEventStore;
pub use migrations::{migrate, schema_version, MigrationError};
pub use outcome_store::SqliteOutcomeStore;
pub use repo_store::SqliteRepoStore;
pub use task_store::SqliteTaskStore;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};

/// Parse an RFC 3339 datetime string from a row field.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC 3339 datetime string from a row field.
pub fn parse_optional_datetime(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Normalise a payload column on read: structured JSON is parsed, anything
/// else is carried as a JSON string, and NULL becomes an empty object.
pub fn parse_payload(s: Option<String>) -> serde_json::Value {
    match s {
        Some(text) => serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::Value::String(text)),
        None => serde_json::Value::Object(serde_json::Map::new()),
    }
}

/// Parse an optional JSON column, passing NULL through.
pub fn parse_optional_json(s: Option<String>) -> Option<serde_json::Value> {
    s.map(|text| {
        serde_json::from_str(&text).unwrap_or_else(|_| serde_json::Value::String(text))
    })
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Open error: {0}")]
    Open(#[from] StoreOpenError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Open the store at the given path and bring the schema up to date.
pub async fn initialize_database(
    path: impl Into<std::path::PathBuf>,
    max_connections: u32,
) -> Result<SqlitePool, DatabaseError> {
    let pool = StoreOptions::at(path)
        .max_connections(max_connections)
        .open()
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = open_in_memory().await?;
    migrate(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrated_test_pool_has_queue_tables() {
        let pool = create_migrated_test_pool().await.unwrap();
        for table in ["repos", "tasks", "approvals", "agent_status", "task_outcomes", "processed_events", "agent_messages", "token_usage"] {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&pool).await.unwrap();
            assert_eq!(count, 0, "table {table} exists and starts empty");
        }
    }

    #[test]
    fn test_parse_payload_normalises() {
        assert_eq!(
            parse_payload(Some("{\"title\":\"x\"}".to_string())),
            serde_json::json!({"title": "x"})
        );
        assert_eq!(
            parse_payload(Some("not json".to_string())),
            serde_json::Value::String("not json".to_string())
        );
        assert_eq!(parse_payload(None), serde_json::json!({}));
    }
}
