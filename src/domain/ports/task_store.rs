//! Task store port.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskStatus};

/// Filter for task listings.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub repo_id: Option<String>,
    pub task_type: Option<String>,
    pub limit: Option<i64>,
}

/// Durable task queue storage.
///
/// All mutations run inside a transaction. The claim primitive is atomic:
/// under the SQLite single-writer model a conditional `UPDATE … WHERE
/// status = 'pending'` decides the race, and losers observe zero rows
/// affected.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a task row unconditionally.
    async fn insert(&self, task: &Task) -> DomainResult<()>;

    /// Insert unless a pending or claimed task of the same type carries the
    /// same deduplication identifier. Returns false when rejected.
    ///
    /// The duplicate check and the insert run in one transaction. Two
    /// concurrent creators may still both pass the check; callers needing
    /// strict uniqueness pair this with `cancel_duplicates`.
    async fn insert_unless_duplicate(&self, task: &Task) -> DomainResult<bool>;

    async fn get(&self, id: &str) -> DomainResult<Option<Task>>;

    /// Release claimed tasks whose `claimed_at` is older than the timeout
    /// back to pending, clearing `assigned_to`. Idempotent. Returns the
    /// number of released tasks.
    async fn release_abandoned(&self, abandon_after_secs: i64) -> DomainResult<u64>;

    /// Atomically claim the best candidate task for an agent.
    ///
    /// Candidate predicate: pending AND (repo matches or no repo filter) AND
    /// (directly assigned to this agent, bypassing the type filter, OR
    /// unassigned with a type in `task_types`). Ordered by priority DESC,
    /// created_at ASC. Runs abandonment release first in the same
    /// transactional scope.
    async fn claim_next(
        &self,
        agent_id: &str,
        repo_id: Option<&str>,
        task_types: Option<&[String]>,
        abandon_after_secs: i64,
    ) -> DomainResult<Option<Task>>;

    /// Flip a claimed task to in_progress. Owner-only CAS.
    async fn mark_in_progress(&self, task_id: &str, agent_id: &str) -> DomainResult<bool>;

    /// Terminal completion CAS: completed, or failed when `error` is set.
    /// Only the claim owner succeeds, and only from a non-terminal status.
    async fn complete(
        &self,
        task_id: &str,
        agent_id: &str,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> DomainResult<bool>;

    /// Cancel a non-terminal task, encoding the reason in `error`.
    async fn cancel(
        &self,
        task_id: &str,
        reason: &str,
        cancelled_by: Option<&str>,
    ) -> DomainResult<bool>;

    /// Pending tasks carrying the given deduplication identifier, ordered
    /// priority DESC then created_at ASC.
    async fn pending_with_identifier(&self, identifier: &str) -> DomainResult<Vec<Task>>;

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>>;

    /// Tasks bound to an agent in the given statuses, oldest claim first.
    /// Used for claim recovery after a runner restart.
    async fn list_assigned(
        &self,
        agent_id: &str,
        statuses: &[TaskStatus],
        limit: i64,
    ) -> DomainResult<Vec<Task>>;

    async fn count_by_status(&self) -> DomainResult<HashMap<TaskStatus, u64>>;
}
