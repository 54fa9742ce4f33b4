//! SQLite implementation of the task queue store.
//!
//! Claim atomicity relies on the SQLite single-writer model: the candidate
//! select and the conditional update run in one transaction, and a lost
//! race surfaces as zero rows affected.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskApprovalStatus, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskStore};

#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Insert a task row on an existing connection so callers can compose it
/// into a wider transaction (dedup-on-create, approval follow-ups).
pub(crate) async fn insert_task(conn: &mut SqliteConnection, task: &Task) -> DomainResult<()> {
    let payload_json = serde_json::to_string(&task.payload)?;
    let result_json = task
        .result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"INSERT INTO tasks (id, repo_id, task_type, priority, payload, status,
           assigned_to, created_by, created_at, claimed_at, completed_at, result,
           error, parent_task_id, needs_approval, approval_status, approval_type,
           approved_by, approved_at, rejection_reason)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&task.id)
    .bind(&task.repo_id)
    .bind(&task.task_type)
    .bind(task.priority)
    .bind(&payload_json)
    .bind(task.status.as_str())
    .bind(&task.assigned_to)
    .bind(&task.created_by)
    .bind(task.created_at.to_rfc3339())
    .bind(task.claimed_at.map(|t| t.to_rfc3339()))
    .bind(task.completed_at.map(|t| t.to_rfc3339()))
    .bind(&result_json)
    .bind(&task.error)
    .bind(&task.parent_task_id)
    .bind(i64::from(task.needs_approval))
    .bind(task.approval_status.map(|s| s.as_str()))
    .bind(&task.approval_type)
    .bind(&task.approved_by)
    .bind(task.approved_at.map(|t| t.to_rfc3339()))
    .bind(&task.rejection_reason)
    .execute(conn)
    .await?;

    Ok(())
}

/// Release abandoned claims on an existing connection. Idempotent: only
/// rows still claimed and older than the cutoff are touched.
async fn release_abandoned_on(
    conn: &mut SqliteConnection,
    abandon_after_secs: i64,
) -> DomainResult<u64> {
    let cutoff = (Utc::now() - Duration::seconds(abandon_after_secs)).to_rfc3339();
    let result = sqlx::query(
        r#"UPDATE tasks
           SET status = 'pending', assigned_to = NULL, claimed_at = NULL
           WHERE status = 'claimed' AND claimed_at < ?"#,
    )
    .bind(&cutoff)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: &Task) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_task(&mut conn, task).await
    }

    async fn insert_unless_duplicate(&self, task: &Task) -> DomainResult<bool> {
        let Some(identifier) = task.dedup_identifier().map(str::to_owned) else {
            self.insert(task).await?;
            return Ok(true);
        };

        let mut tx = self.pool.begin().await?;

        let existing: Option<(String,)> = sqlx::query_as(
            r#"SELECT id FROM tasks
               WHERE status IN ('pending', 'claimed')
               AND task_type = ?
               AND (
                   json_extract(payload, '$.title') = ?
                   OR json_extract(payload, '$.product_name') = ?
                   OR json_extract(payload, '$.name') = ?
                   OR json_extract(payload, '$.product') = ?
               )
               LIMIT 1"#,
        )
        .bind(&task.task_type)
        .bind(&identifier)
        .bind(&identifier)
        .bind(&identifier)
        .bind(&identifier)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((existing_id,)) = existing {
            tx.rollback().await?;
            tracing::warn!(
                identifier = %identifier,
                task_type = %task.task_type,
                existing = %existing_id,
                "Duplicate task rejected"
            );
            return Ok(false);
        }

        insert_task(&mut tx, task).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn release_abandoned(&self, abandon_after_secs: i64) -> DomainResult<u64> {
        let mut conn = self.pool.acquire().await?;
        let released = release_abandoned_on(&mut conn, abandon_after_secs).await?;
        if released > 0 {
            tracing::info!(released, "Released abandoned tasks back to pending");
        }
        Ok(released)
    }

    async fn claim_next(
        &self,
        agent_id: &str,
        repo_id: Option<&str>,
        task_types: Option<&[String]>,
        abandon_after_secs: i64,
    ) -> DomainResult<Option<Task>> {
        let mut tx = self.pool.begin().await?;

        release_abandoned_on(&mut tx, abandon_after_secs).await?;

        // A task directly assigned to this agent bypasses the type filter,
        // so human-injected directives reach their target; unassigned tasks
        // must match the agent's type catalogue.
        let candidate: Option<(String,)> = if let Some(types) = task_types {
            if types.is_empty() {
                tx.commit().await?;
                return Ok(None);
            }
            let placeholders = vec!["?"; types.len()].join(", ");
            let sql = format!(
                r#"SELECT id FROM tasks
                   WHERE status = 'pending'
                   AND (? IS NULL OR repo_id = ?)
                   AND (assigned_to = ? OR (assigned_to IS NULL AND task_type IN ({placeholders})))
                   ORDER BY priority DESC, created_at ASC
                   LIMIT 1"#
            );
            let mut query = sqlx::query_as(&sql)
                .bind(repo_id)
                .bind(repo_id)
                .bind(agent_id);
            for task_type in types {
                query = query.bind(task_type);
            }
            query.fetch_optional(&mut *tx).await?
        } else {
            sqlx::query_as(
                r#"SELECT id FROM tasks
                   WHERE status = 'pending'
                   AND (? IS NULL OR repo_id = ?)
                   AND (assigned_to IS NULL OR assigned_to = ?)
                   ORDER BY priority DESC, created_at ASC
                   LIMIT 1"#,
            )
            .bind(repo_id)
            .bind(repo_id)
            .bind(agent_id)
            .fetch_optional(&mut *tx)
            .await?
        };

        let Some((task_id,)) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let now = Utc::now().to_rfc3339();
        let updated = sqlx::query(
            r#"UPDATE tasks
               SET status = 'claimed', assigned_to = ?, claimed_at = ?
               WHERE id = ? AND status = 'pending'"#,
        )
        .bind(agent_id)
        .bind(&now)
        .bind(&task_id)
        .execute(&mut *tx)
        .await?;

        // Lost the race: another claimer got the row first.
        if updated.rows_affected() == 0 {
            tx.commit().await?;
            return Ok(None);
        }

        let row: TaskRow = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(&task_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(row.try_into()?))
    }

    async fn mark_in_progress(&self, task_id: &str, agent_id: &str) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE tasks SET status = 'in_progress'
               WHERE id = ? AND assigned_to = ? AND status = 'claimed'"#,
        )
        .bind(task_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete(
        &self,
        task_id: &str,
        agent_id: &str,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> DomainResult<bool> {
        let status = if error.is_some() {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        let result_json = result.map(serde_json::to_string).transpose()?;
        let now = Utc::now().to_rfc3339();

        let updated = sqlx::query(
            r#"UPDATE tasks
               SET status = ?, completed_at = ?, result = ?, error = ?
               WHERE id = ? AND assigned_to = ?
               AND status NOT IN ('completed', 'failed', 'cancelled')"#,
        )
        .bind(status.as_str())
        .bind(&now)
        .bind(&result_json)
        .bind(error)
        .bind(task_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn cancel(
        &self,
        task_id: &str,
        reason: &str,
        cancelled_by: Option<&str>,
    ) -> DomainResult<bool> {
        let now = Utc::now().to_rfc3339();
        let error = format!("Cancelled by {}: {}", cancelled_by.unwrap_or("system"), reason);

        let updated = sqlx::query(
            r#"UPDATE tasks
               SET status = 'cancelled', completed_at = ?, error = ?
               WHERE id = ? AND status NOT IN ('completed', 'failed', 'cancelled')"#,
        )
        .bind(&now)
        .bind(&error)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn pending_with_identifier(&self, identifier: &str) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"SELECT * FROM tasks
               WHERE status = 'pending'
               AND (
                   json_extract(payload, '$.title') = ?
                   OR json_extract(payload, '$.product_name') = ?
                   OR json_extract(payload, '$.name') = ?
                   OR json_extract(payload, '$.product') = ?
               )
               ORDER BY priority DESC, created_at ASC"#,
        )
        .bind(identifier)
        .bind(identifier)
        .bind(identifier)
        .bind(identifier)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = &filter.status {
            sql.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(repo_id) = &filter.repo_id {
            sql.push_str(" AND repo_id = ?");
            bindings.push(repo_id.clone());
        }
        if let Some(task_type) = &filter.task_type {
            sql.push_str(" AND task_type = ?");
            bindings.push(task_type.clone());
        }

        // Pending listings follow queue order; everything else is most
        // recent first.
        if filter.status == Some(TaskStatus::Pending) {
            sql.push_str(" ORDER BY priority DESC, created_at ASC");
        } else {
            sql.push_str(" ORDER BY created_at DESC");
        }
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query_as::<_, TaskRow>(&sql);
        for binding in &bindings {
            query = query.bind(binding);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_assigned(
        &self,
        agent_id: &str,
        statuses: &[TaskStatus],
        limit: i64,
    ) -> DomainResult<Vec<Task>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            r#"SELECT * FROM tasks
               WHERE assigned_to = ?
               AND status IN ({placeholders})
               ORDER BY
                   CASE WHEN claimed_at IS NULL THEN 1 ELSE 0 END,
                   claimed_at ASC,
                   created_at ASC
               LIMIT ?"#
        );

        let mut query = sqlx::query_as::<_, TaskRow>(&sql).bind(agent_id);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_by_status(&self) -> DomainResult<HashMap<TaskStatus, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = HashMap::new();
        for (status_str, count) in rows {
            if let Some(status) = TaskStatus::from_str(&status_str) {
                counts.insert(status, u64::try_from(count).unwrap_or(0));
            }
        }
        Ok(counts)
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    repo_id: Option<String>,
    task_type: String,
    priority: i64,
    payload: Option<String>,
    status: String,
    assigned_to: Option<String>,
    created_by: Option<String>,
    created_at: String,
    claimed_at: Option<String>,
    completed_at: Option<String>,
    result: Option<String>,
    error: Option<String>,
    parent_task_id: Option<String>,
    needs_approval: i64,
    approval_status: Option<String>,
    approval_type: Option<String>,
    approved_by: Option<String>,
    approved_at: Option<String>,
    rejection_reason: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid task status: {}", row.status))
        })?;

        Ok(Task {
            id: row.id,
            repo_id: row.repo_id,
            task_type: row.task_type,
            priority: row.priority,
            payload: super::parse_payload(row.payload),
            status,
            assigned_to: row.assigned_to,
            created_by: row.created_by,
            created_at: super::parse_datetime(&row.created_at)?,
            claimed_at: super::parse_optional_datetime(row.claimed_at)?,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
            result: super::parse_optional_json(row.result),
            error: row.error,
            parent_task_id: row.parent_task_id,
            needs_approval: row.needs_approval != 0,
            approval_status: row.approval_status.as_deref().and_then(TaskApprovalStatus::from_str),
            approval_type: row.approval_type,
            approved_by: row.approved_by,
            approved_at: super::parse_optional_datetime(row.approved_at)?,
            rejection_reason: row.rejection_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use serde_json::json;

    async fn setup() -> SqliteTaskStore {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteTaskStore::new(pool)
    }

    fn types(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = setup().await;
        let task = Task::new("implement_fix", json!({"title": "Fix login"}), 5);
        store.insert(&task).await.unwrap();

        let loaded = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.task_type, "implement_fix");
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.payload, json!({"title": "Fix login"}));
    }

    #[tokio::test]
    async fn test_claim_orders_by_priority_then_fifo() {
        let store = setup().await;
        let mut a = Task::new("implement_fix", json!({}), 5);
        a.created_at = a.created_at - chrono::Duration::minutes(2);
        let mut c = Task::new("implement_fix", json!({}), 9);
        c.created_at = c.created_at - chrono::Duration::minutes(1);
        let b = Task::new("implement_fix", json!({}), 9);

        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        store.insert(&c).await.unwrap();

        let t = types(&["implement_fix"]);
        let first = store.claim_next("builder", None, Some(&t), 7200).await.unwrap().unwrap();
        let second = store.claim_next("builder", None, Some(&t), 7200).await.unwrap().unwrap();
        let third = store.claim_next("builder", None, Some(&t), 7200).await.unwrap().unwrap();

        assert_eq!(first.id, c.id, "higher priority, older entry wins");
        assert_eq!(second.id, b.id);
        assert_eq!(third.id, a.id);
    }

    #[tokio::test]
    async fn test_claim_sets_binding_fields() {
        let store = setup().await;
        let task = Task::new("review_mr", json!({}), 5);
        store.insert(&task).await.unwrap();

        let t = types(&["review_mr"]);
        let claimed = store.claim_next("reviewer", None, Some(&t), 7200).await.unwrap().unwrap();
        assert_eq!(claimed.status, TaskStatus::Claimed);
        assert_eq!(claimed.assigned_to.as_deref(), Some("reviewer"));
        assert!(claimed.claimed_at.is_some());
    }

    #[tokio::test]
    async fn test_type_gating() {
        let store = setup().await;
        store.insert(&Task::new("review_mr", json!({}), 5)).await.unwrap();

        let t = types(&["implement_fix"]);
        let claimed = store.claim_next("builder", None, Some(&t), 7200).await.unwrap();
        assert!(claimed.is_none(), "agent without the type never claims");
    }

    #[tokio::test]
    async fn test_direct_assignment_bypasses_type_filter() {
        let store = setup().await;
        let task = Task::new("human_directive", json!({}), 5).with_assigned_to("devops");
        store.insert(&task).await.unwrap();

        // Another agent with matching types cannot take an assigned task.
        let t = types(&["human_directive"]);
        assert!(store.claim_next("builder", None, Some(&t), 7200).await.unwrap().is_none());

        // The target agent claims it even without the type in its catalogue.
        let t = types(&["manage_pipeline"]);
        let claimed = store.claim_next("devops", None, Some(&t), 7200).await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
    }

    #[tokio::test]
    async fn test_repo_filter() {
        let store = setup().await;
        store
            .insert(&Task::new("implement_fix", json!({}), 5).with_repo("r1"))
            .await
            .unwrap();

        let t = types(&["implement_fix"]);
        assert!(store.claim_next("builder", Some("r2"), Some(&t), 7200).await.unwrap().is_none());
        assert!(store.claim_next("builder", Some("r1"), Some(&t), 7200).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dedup_rejects_second_insert() {
        let store = setup().await;
        let first = Task::new("implement_feature", json!({"title": "Add OAuth"}), 5);
        let second = Task::new("implement_feature", json!({"title": "Add OAuth"}), 5);

        assert!(store.insert_unless_duplicate(&first).await.unwrap());
        assert!(!store.insert_unless_duplicate(&second).await.unwrap());

        // Different type with the same identifier is not a duplicate.
        let other_type = Task::new("write_tests", json!({"title": "Add OAuth"}), 5);
        assert!(store.insert_unless_duplicate(&other_type).await.unwrap());
    }

    #[tokio::test]
    async fn test_abandonment_recovery() {
        let store = setup().await;
        let mut task = Task::new("implement_fix", json!({}), 5);
        task.status = TaskStatus::Claimed;
        task.assigned_to = Some("builder".to_string());
        task.claimed_at = Some(Utc::now() - chrono::Duration::hours(3));
        store.insert(&task).await.unwrap();

        let t = types(&["implement_fix"]);
        let claimed = store.claim_next("builder-2", None, Some(&t), 7200).await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
        assert_eq!(claimed.assigned_to.as_deref(), Some("builder-2"));

        // The original claimer's completion must miss its CAS.
        let ok = store.complete(&task.id, "builder", Some(&json!({"done": true})), None).await.unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_release_abandoned_is_idempotent() {
        let store = setup().await;
        let mut task = Task::new("implement_fix", json!({}), 5);
        task.status = TaskStatus::Claimed;
        task.assigned_to = Some("builder".to_string());
        task.claimed_at = Some(Utc::now() - chrono::Duration::hours(3));
        store.insert(&task).await.unwrap();

        assert_eq!(store.release_abandoned(7200).await.unwrap(), 1);
        assert_eq!(store.release_abandoned(7200).await.unwrap(), 0);

        let reloaded = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Pending);
        assert!(reloaded.assigned_to.is_none());
        assert!(reloaded.claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_fresh_claims_are_not_released() {
        let store = setup().await;
        let t = types(&["implement_fix"]);
        store.insert(&Task::new("implement_fix", json!({}), 5)).await.unwrap();
        store.claim_next("builder", None, Some(&t), 7200).await.unwrap().unwrap();

        assert_eq!(store.release_abandoned(7200).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_complete_success_and_failure() {
        let store = setup().await;
        let t = types(&["implement_fix"]);

        store.insert(&Task::new("implement_fix", json!({}), 5)).await.unwrap();
        let claimed = store.claim_next("builder", None, Some(&t), 7200).await.unwrap().unwrap();
        assert!(store.complete(&claimed.id, "builder", Some(&json!({"exit_code": 0})), None).await.unwrap());
        let done = store.get(&claimed.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());

        store.insert(&Task::new("implement_fix", json!({}), 5)).await.unwrap();
        let claimed = store.claim_next("builder", None, Some(&t), 7200).await.unwrap().unwrap();
        assert!(store.complete(&claimed.id, "builder", None, Some("Session exited with code 1")).await.unwrap());
        let failed = store.get(&claimed.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("Session exited with code 1"));
    }

    #[tokio::test]
    async fn test_cancel_terminal_returns_false() {
        let store = setup().await;
        let t = types(&["implement_fix"]);
        store.insert(&Task::new("implement_fix", json!({}), 5)).await.unwrap();
        let claimed = store.claim_next("builder", None, Some(&t), 7200).await.unwrap().unwrap();
        store.complete(&claimed.id, "builder", None, None).await.unwrap();

        assert!(!store.cancel(&claimed.id, "obsolete", None).await.unwrap());
        let task = store.get(&claimed.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_in_progress_then_complete_is_noop() {
        let store = setup().await;
        let t = types(&["implement_fix"]);
        store.insert(&Task::new("implement_fix", json!({}), 5)).await.unwrap();
        let claimed = store.claim_next("builder", None, Some(&t), 7200).await.unwrap().unwrap();
        assert!(store.mark_in_progress(&claimed.id, "builder").await.unwrap());

        assert!(store.cancel(&claimed.id, "superseded", Some("human")).await.unwrap());

        // The worker's eventual completion misses the CAS.
        assert!(!store.complete(&claimed.id, "builder", None, None).await.unwrap());
        let task = store.get(&claimed.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_list_assigned_for_recovery() {
        let store = setup().await;
        let t = types(&["implement_fix"]);
        store.insert(&Task::new("implement_fix", json!({}), 5)).await.unwrap();
        let claimed = store.claim_next("builder", None, Some(&t), 7200).await.unwrap().unwrap();

        let assigned = store
            .list_assigned("builder", &[TaskStatus::Claimed, TaskStatus::InProgress], 5)
            .await
            .unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].id, claimed.id);
    }

    #[tokio::test]
    async fn test_payload_string_normalised_on_read() {
        let store = setup().await;
        let task = Task::new("directive", json!({}), 5);
        store.insert(&task).await.unwrap();

        // Simulate a legacy writer that stored a bare string payload.
        sqlx::query("UPDATE tasks SET payload = 'do the thing' WHERE id = ?")
            .bind(&task.id)
            .execute(&store.pool)
            .await
            .unwrap();

        let loaded = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.payload, serde_json::Value::String("do the thing".to_string()));
    }
}
