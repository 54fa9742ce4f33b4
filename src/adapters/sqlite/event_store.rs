//! SQLite implementation of the processed-event store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::DomainResult;
use crate::domain::ports::EventStore;

#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn is_processed(&self, event_id: &str, repo_id: &str, action: &str) -> DomainResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM processed_events WHERE event_id = ? AND repo_id = ? AND action = ?",
        )
        .bind(event_id)
        .bind(repo_id)
        .bind(action)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn mark_processed(&self, event_id: &str, repo_id: &str, action: &str) -> DomainResult<()> {
        // Duplicate marks are dropped by the unique constraint.
        sqlx::query(
            r#"INSERT OR IGNORE INTO processed_events (event_id, repo_id, action, processed_at)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(event_id)
        .bind(repo_id)
        .bind(action)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn test_mark_and_check() {
        let store = SqliteEventStore::new(create_migrated_test_pool().await.unwrap());
        assert!(!store.is_processed("42", "r1", "open").await.unwrap());

        store.mark_processed("42", "r1", "open").await.unwrap();
        assert!(store.is_processed("42", "r1", "open").await.unwrap());

        // Same issue, different action is a distinct event.
        assert!(!store.is_processed("42", "r1", "close").await.unwrap());
        // Duplicate marks are silent.
        store.mark_processed("42", "r1", "open").await.unwrap();
    }
}
