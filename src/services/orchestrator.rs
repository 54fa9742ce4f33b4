//! Task queue protocol and approval workflow.
//!
//! The orchestrator is the only writer of queue state. It never raises on a
//! lost CAS: claim races and stale completions surface as None/false and
//! callers proceed.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    clamp_priority, AgentMessage, AgentState, AgentStatus, Approval, ApprovalStatus, ApprovalType,
    AutonomyMode, Repo, Task, TaskOutcome, TaskStatus, TokenUsage,
};
use crate::domain::ports::{
    AgentStore, ApprovalStore, EventStore, Notifier, OutcomeStore, RepoStore, TaskFilter, TaskStore,
};

/// Reviewer id recorded on threshold-based approvals.
pub const AUTO_APPROVER: &str = "auto-approver";

/// Parameters for task creation.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub repo_id: Option<String>,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: i64,
    pub created_by: Option<String>,
    pub assigned_to: Option<String>,
    pub allow_duplicates: bool,
    pub parent_task_id: Option<String>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            repo_id: None,
            task_type: task_type.into(),
            payload,
            priority: 5,
            created_by: None,
            assigned_to: None,
            allow_duplicates: false,
            parent_task_id: None,
        }
    }

    pub fn with_repo(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = Some(repo_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    pub fn with_assigned_to(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_to = Some(agent_id.into());
        self
    }

    pub fn allowing_duplicates(mut self) -> Self {
        self.allow_duplicates = true;
        self
    }

    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }
}

/// Orchestrator over the store ports.
///
/// Components receive this as an explicit dependency; nothing discovers the
/// store on its own.
pub struct Orchestrator {
    tasks: Arc<dyn TaskStore>,
    repos: Arc<dyn RepoStore>,
    approvals: Arc<dyn ApprovalStore>,
    agents: Arc<dyn AgentStore>,
    outcomes: Arc<dyn OutcomeStore>,
    events: Arc<dyn EventStore>,
    notifier: Arc<dyn Notifier>,
    abandon_after_secs: i64,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        repos: Arc<dyn RepoStore>,
        approvals: Arc<dyn ApprovalStore>,
        agents: Arc<dyn AgentStore>,
        outcomes: Arc<dyn OutcomeStore>,
        events: Arc<dyn EventStore>,
        notifier: Arc<dyn Notifier>,
        abandon_after_secs: i64,
    ) -> Self {
        Self {
            tasks,
            repos,
            approvals,
            agents,
            outcomes,
            events,
            notifier,
            abandon_after_secs,
        }
    }

    /// Wire up the orchestrator over the SQLite adapters.
    pub fn sqlite(pool: SqlitePool, notifier: Arc<dyn Notifier>, abandon_after_secs: i64) -> Self {
        use crate::adapters::sqlite::{
            SqliteAgentStore, SqliteApprovalStore, SqliteEventStore, SqliteOutcomeStore,
            SqliteRepoStore, SqliteTaskStore,
        };
        Self::new(
            Arc::new(SqliteTaskStore::new(pool.clone())),
            Arc::new(SqliteRepoStore::new(pool.clone())),
            Arc::new(SqliteApprovalStore::new(pool.clone())),
            Arc::new(SqliteAgentStore::new(pool.clone())),
            Arc::new(SqliteOutcomeStore::new(pool.clone())),
            Arc::new(SqliteEventStore::new(pool)),
            notifier,
            abandon_after_secs,
        )
    }

    // ==================== TASK QUEUE ====================

    /// Create a task. Returns None when rejected as a duplicate.
    pub async fn create_task(&self, new_task: NewTask) -> DomainResult<Option<Task>> {
        let mut task = Task::new(
            new_task.task_type,
            new_task.payload,
            clamp_priority(new_task.priority),
        );
        task.repo_id = new_task.repo_id;
        task.created_by = new_task.created_by;
        task.assigned_to = new_task.assigned_to;
        task.parent_task_id = new_task.parent_task_id;

        let inserted = if new_task.allow_duplicates {
            self.tasks.insert(&task).await?;
            true
        } else {
            self.tasks.insert_unless_duplicate(&task).await?
        };

        if !inserted {
            return Ok(None);
        }

        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority,
            "Created task"
        );
        let channel = task
            .repo_id
            .as_deref()
            .map_or_else(|| "tasks".to_string(), |r| format!("tasks:{r}"));
        self.notifier
            .publish(&channel, &format!("task created: {} ({})", task.id, task.task_type))
            .await;

        Ok(Some(task))
    }

    /// Claim the best available task for an agent.
    ///
    /// Abandoned claims are recovered first, in the same transactional
    /// scope as the claim itself. A lost race returns None.
    pub async fn claim_task(
        &self,
        agent_id: &str,
        repo_id: Option<&str>,
        task_types: Option<&[String]>,
    ) -> DomainResult<Option<Task>> {
        let claimed = self
            .tasks
            .claim_next(agent_id, repo_id, task_types, self.abandon_after_secs)
            .await?;
        if let Some(task) = &claimed {
            tracing::info!(agent_id, task_id = %task.id, task_type = %task.task_type, "Claimed task");
        }
        Ok(claimed)
    }

    /// Flip a claimed task to in_progress when its worker starts.
    pub async fn mark_in_progress(&self, task_id: &str, agent_id: &str) -> DomainResult<bool> {
        self.tasks.mark_in_progress(task_id, agent_id).await
    }

    /// Complete a task: failed when `error` is set, completed otherwise.
    /// Returns false when the caller no longer owns the claim or the task
    /// is already terminal (e.g. cancelled mid-flight).
    pub async fn complete_task(
        &self,
        task_id: &str,
        agent_id: &str,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> DomainResult<bool> {
        let updated = self.tasks.complete(task_id, agent_id, result, error).await?;
        if updated {
            if let Some(error) = error {
                tracing::warn!(task_id, agent_id, error, "Task failed");
                self.notifier
                    .alert("task failed", &format!("{task_id} ({agent_id}): {error}"))
                    .await;
            } else {
                tracing::info!(task_id, agent_id, "Task completed");
            }
        }
        Ok(updated)
    }

    /// Cancel a non-terminal task. Advisory against a running worker: the
    /// worker's eventual completion misses its CAS and is a no-op.
    pub async fn cancel_task(
        &self,
        task_id: &str,
        reason: &str,
        cancelled_by: Option<&str>,
    ) -> DomainResult<bool> {
        let cancelled = self.tasks.cancel(task_id, reason, cancelled_by).await?;
        if cancelled {
            tracing::info!(task_id, reason, "Task cancelled");
        }
        Ok(cancelled)
    }

    /// Cancel all but one pending task carrying the identifier. Keeps the
    /// explicit keeper, else the best-ranked entry (priority, then FIFO).
    pub async fn cancel_duplicate_tasks(
        &self,
        identifier: &str,
        keep_task_id: Option<&str>,
    ) -> DomainResult<usize> {
        let candidates = self.tasks.pending_with_identifier(identifier).await?;
        if candidates.len() <= 1 {
            return Ok(0);
        }

        let keep_id = keep_task_id
            .map(str::to_owned)
            .unwrap_or_else(|| candidates[0].id.clone());

        let mut cancelled = 0;
        for task in &candidates {
            if task.id == keep_id {
                continue;
            }
            if self
                .tasks
                .cancel(&task.id, &format!("Duplicate of {keep_id}"), Some("meta"))
                .await?
            {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    pub async fn get_task(&self, task_id: &str) -> DomainResult<Option<Task>> {
        self.tasks.get(task_id).await
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        self.tasks.list(filter).await
    }

    /// Tasks still bound to an agent; used for claim recovery on restart.
    pub async fn get_assigned_tasks(
        &self,
        agent_id: &str,
        limit: i64,
    ) -> DomainResult<Vec<Task>> {
        self.tasks
            .list_assigned(agent_id, &[TaskStatus::Claimed, TaskStatus::InProgress], limit)
            .await
    }

    pub async fn release_abandoned_tasks(&self) -> DomainResult<u64> {
        self.tasks.release_abandoned(self.abandon_after_secs).await
    }

    pub async fn queue_stats(&self) -> DomainResult<std::collections::HashMap<TaskStatus, u64>> {
        self.tasks.count_by_status().await
    }

    // ==================== OUTCOMES ====================

    /// Append an outcome row. Never referenced by task-state logic.
    pub async fn record_outcome(&self, outcome: &TaskOutcome) -> DomainResult<()> {
        self.outcomes.record(outcome).await
    }

    // ==================== APPROVALS ====================

    /// Submit a decision for sign-off.
    ///
    /// For repos in full autonomy the threshold policy runs here, at the
    /// creation boundary: a qualifying approval is stored already approved,
    /// with its follow-up task in the same transaction.
    pub async fn create_approval(&self, mut approval: Approval) -> DomainResult<Approval> {
        let repo = match &approval.repo_id {
            Some(repo_id) => self.repos.get(repo_id).await?,
            None => None,
        };

        let auto = repo
            .as_ref()
            .is_some_and(|r| r.autonomy_mode == AutonomyMode::Full && auto_approval_eligible(r, &approval));

        if auto {
            approval.status = ApprovalStatus::Approved;
            approval.reviewer_notes = Some(format!("Auto-approved by {AUTO_APPROVER}"));
            approval.reviewed_at = Some(Utc::now());

            let follow_up = self.approval_follow_up(&approval);
            self.approvals.insert(&approval, follow_up.as_ref()).await?;

            tracing::info!(approval_id = %approval.id, approval_type = approval.approval_type.as_str(), "Approval auto-approved");
            self.notifier
                .publish(
                    "approvals",
                    &format!("auto-approved: {} ({})", approval.title, approval.approval_type.as_str()),
                )
                .await;
        } else {
            self.approvals.insert(&approval, None).await?;
            self.notifier
                .publish(
                    "approvals",
                    &format!(
                        "approval requested: {} ({}) by {}",
                        approval.title,
                        approval.approval_type.as_str(),
                        approval.submitted_by
                    ),
                )
                .await;
        }

        Ok(approval)
    }

    /// Human approval. Spec approvals get their implementation task in the
    /// same transaction as the status flip; merge approvals only notify.
    pub async fn approve(&self, approval_id: &str, notes: Option<&str>) -> DomainResult<bool> {
        let Some(approval) = self.approvals.get(approval_id).await? else {
            return Ok(false);
        };

        let follow_up = self.approval_follow_up(&approval);
        let resolved = self
            .approvals
            .resolve(approval_id, ApprovalStatus::Approved, notes, follow_up.as_ref())
            .await?;

        if resolved {
            tracing::info!(approval_id, "Approval granted");
            self.notifier
                .publish("approvals", &format!("approved: {}", approval.title))
                .await;
        }
        Ok(resolved)
    }

    pub async fn reject(&self, approval_id: &str, notes: &str) -> DomainResult<bool> {
        let resolved = self
            .approvals
            .resolve(approval_id, ApprovalStatus::Rejected, Some(notes), None)
            .await?;
        if resolved {
            tracing::info!(approval_id, notes, "Approval rejected");
            self.notifier
                .publish("approvals", &format!("rejected: {approval_id}"))
                .await;
        }
        Ok(resolved)
    }

    pub async fn get_approval(&self, approval_id: &str) -> DomainResult<Option<Approval>> {
        self.approvals.get(approval_id).await
    }

    pub async fn pending_approvals(&self) -> DomainResult<Vec<Approval>> {
        self.approvals.list_pending().await
    }

    pub async fn all_approvals(&self, limit: i64) -> DomainResult<Vec<Approval>> {
        self.approvals.list_all(limit).await
    }

    /// The task spawned when an approval of this type is granted.
    fn approval_follow_up(&self, approval: &Approval) -> Option<Task> {
        if approval.approval_type != ApprovalType::SpecApproval {
            return None;
        }
        let mut task = Task::new(
            "implement_feature",
            json!({
                "title": approval.title,
                "approval_id": approval.id,
                "forge_ref": approval.forge_ref,
            }),
            6,
        );
        task.repo_id = approval.repo_id.clone();
        task.created_by = Some("orchestrator".to_string());
        task.parent_task_id = Some(approval.id.clone());
        Some(task)
    }

    // ==================== REPOS ====================

    pub async fn get_repo(&self, repo_id: &str) -> DomainResult<Option<Repo>> {
        self.repos.get(repo_id).await
    }

    pub async fn get_repo_by_project_ref(&self, project_ref: &str) -> DomainResult<Option<Repo>> {
        self.repos.get_by_project_ref(project_ref).await
    }

    pub async fn list_repos(&self, active_only: bool) -> DomainResult<Vec<Repo>> {
        self.repos.list(active_only).await
    }

    pub async fn create_repo(&self, repo: &Repo) -> DomainResult<()> {
        self.repos.insert(repo).await
    }

    pub async fn update_repo(&self, repo: &Repo) -> DomainResult<bool> {
        self.repos.update(repo).await
    }

    pub async fn deactivate_repo(&self, repo_id: &str) -> DomainResult<bool> {
        self.repos.deactivate(repo_id).await
    }

    // ==================== PROCESSED EVENTS ====================

    pub async fn is_event_processed(
        &self,
        event_id: &str,
        repo_id: &str,
        action: &str,
    ) -> DomainResult<bool> {
        self.events.is_processed(event_id, repo_id, action).await
    }

    pub async fn mark_event_processed(
        &self,
        event_id: &str,
        repo_id: &str,
        action: &str,
    ) -> DomainResult<()> {
        self.events.mark_processed(event_id, repo_id, action).await
    }

    // ==================== AGENTS ====================

    pub async fn update_agent_status(
        &self,
        agent_id: &str,
        state: AgentState,
        current_task_id: Option<&str>,
    ) -> DomainResult<()> {
        self.agents.update_status(agent_id, state, current_task_id, None).await
    }

    pub async fn increment_completed(&self, agent_id: &str) -> DomainResult<()> {
        self.agents.increment_completed(agent_id).await
    }

    pub async fn agent_statuses(&self) -> DomainResult<Vec<AgentStatus>> {
        self.agents.list_statuses().await
    }

    pub async fn record_token_usage(&self, usage: &TokenUsage) -> DomainResult<()> {
        self.agents.record_token_usage(usage).await
    }

    pub async fn send_message(&self, message: &AgentMessage) -> DomainResult<()> {
        self.agents.send_message(message).await
    }

    pub async fn unread_messages(&self, agent_id: &str) -> DomainResult<Vec<AgentMessage>> {
        self.agents.unread_messages(agent_id).await
    }

    pub async fn mark_message_read(&self, message_id: &str, agent_id: &str) -> DomainResult<bool> {
        self.agents.mark_read(message_id, agent_id).await
    }
}

/// Threshold policy for full-autonomy repos.
///
/// Guided mode never reaches this; see [`Orchestrator::create_approval`].
fn auto_approval_eligible(repo: &Repo, approval: &Approval) -> bool {
    match approval.approval_type {
        ApprovalType::SpecApproval => {
            let threshold = repo.auto_approve_threshold("spec_confidence", 8.0);
            approval
                .context_number("confidence")
                .is_some_and(|c| c >= threshold)
        }
        ApprovalType::MergeApproval => {
            let score_threshold = repo.auto_approve_threshold("merge_review_score", 9.0);
            let coverage_threshold = repo.auto_approve_threshold("merge_test_coverage", 80.0);
            let score_ok = approval
                .context_number("review_score")
                .is_some_and(|s| s >= score_threshold);
            let coverage_ok = approval
                .context_number("test_coverage")
                .is_some_and(|c| c >= coverage_threshold);
            score_ok && coverage_ok
        }
        // Issue creation and deploys always wait for a human.
        ApprovalType::IssueCreation | ApprovalType::DeployApproval => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::ForgeProvider;
    use crate::domain::ports::LogNotifier;

    async fn setup() -> Orchestrator {
        let pool = create_migrated_test_pool().await.unwrap();
        Orchestrator::sqlite(pool, Arc::new(LogNotifier), 7200)
    }

    fn types(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_task_clamps_priority() {
        let orch = setup().await;
        let task = orch
            .create_task(NewTask::new("implement_fix", json!({})).with_priority(42))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.priority, 10);

        let task = orch
            .create_task(NewTask::new("implement_fix", json!({})).with_priority(0).allowing_duplicates())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.priority, 1);
    }

    #[tokio::test]
    async fn test_dedup_then_force_then_cancel_duplicates() {
        let orch = setup().await;

        let t1 = orch
            .create_task(NewTask::new("implement_feature", json!({"title": "Add OAuth"})))
            .await
            .unwrap()
            .unwrap();
        assert!(orch
            .create_task(NewTask::new("implement_feature", json!({"title": "Add OAuth"})))
            .await
            .unwrap()
            .is_none());

        let t2 = orch
            .create_task(
                NewTask::new("implement_feature", json!({"title": "Add OAuth"})).allowing_duplicates(),
            )
            .await
            .unwrap()
            .unwrap();

        let cancelled = orch.cancel_duplicate_tasks("Add OAuth", Some(&t1.id)).await.unwrap();
        assert_eq!(cancelled, 1);

        assert_eq!(orch.get_task(&t1.id).await.unwrap().unwrap().status, TaskStatus::Pending);
        assert_eq!(orch.get_task(&t2.id).await.unwrap().unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_claim_complete_flow() {
        let orch = setup().await;
        let t = types(&["implement_fix"]);

        orch.create_task(NewTask::new("implement_fix", json!({"title": "x"})))
            .await
            .unwrap()
            .unwrap();

        let claimed = orch.claim_task("builder", None, Some(&t)).await.unwrap().unwrap();
        assert!(orch.mark_in_progress(&claimed.id, "builder").await.unwrap());
        assert!(orch
            .complete_task(&claimed.id, "builder", Some(&json!({"exit_code": 0})), None)
            .await
            .unwrap());

        // Second completion misses the CAS.
        assert!(!orch.complete_task(&claimed.id, "builder", None, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_spec_approval_creates_follow_up() {
        let orch = setup().await;
        let approval = Approval::new(ApprovalType::SpecApproval, "OAuth spec", "spec body", "architect");
        let approval = orch.create_approval(approval).await.unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);

        assert!(orch.approve(&approval.id, Some("ship it")).await.unwrap());

        let tasks = orch
            .list_tasks(TaskFilter { status: Some(TaskStatus::Pending), ..Default::default() })
            .await
            .unwrap();
        let follow_ups: Vec<_> = tasks
            .iter()
            .filter(|t| t.parent_task_id.as_deref() == Some(approval.id.as_str()))
            .collect();
        assert_eq!(follow_ups.len(), 1, "exactly one implementation task");
        assert_eq!(follow_ups[0].task_type, "implement_feature");
    }

    #[tokio::test]
    async fn test_merge_approval_has_no_follow_up() {
        let orch = setup().await;
        let approval = Approval::new(ApprovalType::MergeApproval, "MR !5", "", "reviewer");
        let approval = orch.create_approval(approval).await.unwrap();
        assert!(orch.approve(&approval.id, None).await.unwrap());

        let tasks = orch.list_tasks(TaskFilter::default()).await.unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_auto_approval_in_full_autonomy() {
        let orch = setup().await;
        let repo = Repo::new("demo", ForgeProvider::Gitlab, "https://gitlab.example.com", "g/demo", "demo")
            .with_autonomy_mode(AutonomyMode::Full);
        orch.create_repo(&repo).await.unwrap();

        let approval = Approval::new(ApprovalType::SpecApproval, "OAuth spec", "", "architect")
            .with_repo(repo.id.clone())
            .with_context(json!({"confidence": 9}));
        let approval = orch.create_approval(approval).await.unwrap();
        assert_eq!(approval.status, ApprovalStatus::Approved);

        // The follow-up task landed with the approval.
        let tasks = orch.list_tasks(TaskFilter::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].parent_task_id.as_deref(), Some(approval.id.as_str()));
    }

    #[tokio::test]
    async fn test_auto_approval_below_threshold_stays_pending() {
        let orch = setup().await;
        let repo = Repo::new("demo", ForgeProvider::Gitlab, "https://gitlab.example.com", "g/demo", "demo")
            .with_autonomy_mode(AutonomyMode::Full);
        orch.create_repo(&repo).await.unwrap();

        let approval = Approval::new(ApprovalType::SpecApproval, "Shaky spec", "", "architect")
            .with_repo(repo.id.clone())
            .with_context(json!({"confidence": 5}));
        let approval = orch.create_approval(approval).await.unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_guided_mode_never_auto_approves() {
        let orch = setup().await;
        let repo = Repo::new("demo", ForgeProvider::Gitlab, "https://gitlab.example.com", "g/demo", "demo");
        orch.create_repo(&repo).await.unwrap();

        let approval = Approval::new(ApprovalType::MergeApproval, "MR !7", "", "reviewer")
            .with_repo(repo.id.clone())
            .with_context(json!({"review_score": 10, "test_coverage": 100}));
        let approval = orch.create_approval(approval).await.unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_merge_auto_approval_needs_both_thresholds() {
        let orch = setup().await;
        let repo = Repo::new("demo", ForgeProvider::Gitlab, "https://gitlab.example.com", "g/demo", "demo")
            .with_autonomy_mode(AutonomyMode::Full);
        orch.create_repo(&repo).await.unwrap();

        let high_score_low_coverage = Approval::new(ApprovalType::MergeApproval, "MR !8", "", "reviewer")
            .with_repo(repo.id.clone())
            .with_context(json!({"review_score": 10, "test_coverage": 50}));
        let approval = orch.create_approval(high_score_low_coverage).await.unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);

        let both = Approval::new(ApprovalType::MergeApproval, "MR !9", "", "reviewer")
            .with_repo(repo.id.clone())
            .with_context(json!({"review_score": 9, "test_coverage": 85}));
        let approval = orch.create_approval(both).await.unwrap();
        assert_eq!(approval.status, ApprovalStatus::Approved);
    }
}
