//! SQLite implementation of the approval store.
//!
//! Resolution and the optional follow-up task share one transaction so an
//! approved spec is never observed without its implementation task.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Approval, ApprovalStatus, ApprovalType, Task};
use crate::domain::ports::ApprovalStore;

use super::task_store::insert_task;

#[derive(Clone)]
pub struct SqliteApprovalStore {
    pool: SqlitePool,
}

impl SqliteApprovalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApprovalStore for SqliteApprovalStore {
    async fn insert(&self, approval: &Approval, follow_up: Option<&Task>) -> DomainResult<()> {
        let context_json = serde_json::to_string(&approval.context)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO approvals (id, repo_id, approval_type, title, description,
               context, submitted_by, status, reviewer_notes, forge_ref, created_at, reviewed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&approval.id)
        .bind(&approval.repo_id)
        .bind(approval.approval_type.as_str())
        .bind(&approval.title)
        .bind(&approval.description)
        .bind(&context_json)
        .bind(&approval.submitted_by)
        .bind(approval.status.as_str())
        .bind(&approval.reviewer_notes)
        .bind(&approval.forge_ref)
        .bind(approval.created_at.to_rfc3339())
        .bind(approval.reviewed_at.map(|t| t.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        if let Some(task) = follow_up {
            insert_task(&mut tx, task).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Approval>> {
        let row: Option<ApprovalRow> = sqlx::query_as("SELECT * FROM approvals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn resolve(
        &self,
        id: &str,
        status: ApprovalStatus,
        notes: Option<&str>,
        follow_up: Option<&Task>,
    ) -> DomainResult<bool> {
        if !status.is_terminal() {
            return Err(DomainError::ValidationFailed(
                "Approval resolution requires a terminal status".to_string(),
            ));
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"UPDATE approvals
               SET status = ?, reviewer_notes = ?, reviewed_at = ?
               WHERE id = ? AND status = 'pending'"#,
        )
        .bind(status.as_str())
        .bind(notes)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(task) = follow_up {
            insert_task(&mut tx, task).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list_pending(&self) -> DomainResult<Vec<Approval>> {
        let rows: Vec<ApprovalRow> = sqlx::query_as(
            "SELECT * FROM approvals WHERE status = 'pending' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_all(&self, limit: i64) -> DomainResult<Vec<Approval>> {
        let rows: Vec<ApprovalRow> =
            sqlx::query_as("SELECT * FROM approvals ORDER BY created_at DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    id: String,
    repo_id: Option<String>,
    approval_type: String,
    title: String,
    description: Option<String>,
    context: Option<String>,
    submitted_by: String,
    status: String,
    reviewer_notes: Option<String>,
    forge_ref: Option<String>,
    created_at: String,
    reviewed_at: Option<String>,
}

impl TryFrom<ApprovalRow> for Approval {
    type Error = DomainError;

    fn try_from(row: ApprovalRow) -> Result<Self, Self::Error> {
        let approval_type = ApprovalType::from_str(&row.approval_type).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid approval type: {}", row.approval_type))
        })?;
        let status = ApprovalStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid approval status: {}", row.status))
        })?;

        Ok(Approval {
            id: row.id,
            repo_id: row.repo_id,
            approval_type,
            title: row.title,
            description: row.description.unwrap_or_default(),
            context: super::parse_payload(row.context),
            submitted_by: row.submitted_by,
            status,
            reviewer_notes: row.reviewer_notes,
            forge_ref: row.forge_ref,
            created_at: super::parse_datetime(&row.created_at)?,
            reviewed_at: super::parse_optional_datetime(row.reviewed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteTaskStore};
    use crate::domain::ports::TaskStore;
    use serde_json::json;

    async fn setup() -> (SqliteApprovalStore, SqliteTaskStore) {
        let pool = create_migrated_test_pool().await.unwrap();
        (
            SqliteApprovalStore::new(pool.clone()),
            SqliteTaskStore::new(pool),
        )
    }

    #[tokio::test]
    async fn test_insert_and_list_pending() {
        let (store, _) = setup().await;
        let approval = Approval::new(ApprovalType::SpecApproval, "OAuth spec", "", "architect");
        store.insert(&approval, None).await.unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].title, "OAuth spec");
    }

    #[tokio::test]
    async fn test_resolve_with_follow_up_task() {
        let (store, tasks) = setup().await;
        let approval = Approval::new(ApprovalType::SpecApproval, "OAuth spec", "", "architect");
        store.insert(&approval, None).await.unwrap();

        let follow_up = Task::new("implement_feature", json!({"title": "OAuth spec"}), 6)
            .with_parent(approval.id.clone());
        assert!(store
            .resolve(&approval.id, ApprovalStatus::Approved, Some("lgtm"), Some(&follow_up))
            .await
            .unwrap());

        let resolved = store.get(&approval.id).await.unwrap().unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.reviewer_notes.as_deref(), Some("lgtm"));
        assert!(resolved.reviewed_at.is_some());

        let task = tasks.get(&follow_up.id).await.unwrap().unwrap();
        assert_eq!(task.parent_task_id.as_deref(), Some(approval.id.as_str()));
    }

    #[tokio::test]
    async fn test_resolve_twice_fails_cas() {
        let (store, _) = setup().await;
        let approval = Approval::new(ApprovalType::MergeApproval, "MR !9", "", "reviewer");
        store.insert(&approval, None).await.unwrap();

        assert!(store.resolve(&approval.id, ApprovalStatus::Rejected, Some("no"), None).await.unwrap());
        assert!(!store.resolve(&approval.id, ApprovalStatus::Approved, None, None).await.unwrap());

        let resolved = store.get(&approval.id).await.unwrap().unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn test_resolve_rejects_pending_status() {
        let (store, _) = setup().await;
        let approval = Approval::new(ApprovalType::MergeApproval, "MR !9", "", "reviewer");
        store.insert(&approval, None).await.unwrap();

        let err = store
            .resolve(&approval.id, ApprovalStatus::Pending, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ValidationFailed(_)));
    }
}
