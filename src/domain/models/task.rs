//! Task domain model.
//!
//! Tasks are the unit of work drained by agent runners. They live in a
//! durable priority queue shared across all registered repos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lowest accepted task priority.
pub const PRIORITY_MIN: i64 = 1;
/// Highest accepted task priority.
pub const PRIORITY_MAX: i64 = 10;

/// Clamp a requested priority into the accepted range.
pub fn clamp_priority(priority: i64) -> i64 {
    priority.clamp(PRIORITY_MIN, PRIORITY_MAX)
}

/// Status of a task in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue, claimable.
    Pending,
    /// Bound to exactly one agent, worker not yet started.
    Claimed,
    /// A worker subprocess is executing the task.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Withdrawn before completion.
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "in_progress" => Some(Self::InProgress),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are immutable except for bookkeeping notes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Review state of an approval attached to a task, when one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl TaskApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: String,
    /// Owning repo; None for global maintenance tasks.
    pub repo_id: Option<String>,
    /// Task type from the closed catalog (see [`agent_task_types`]).
    pub task_type: String,
    /// 1-10, higher first.
    pub priority: i64,
    /// Opaque payload; each task-type handler owns its schema.
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    /// When set, ONLY this agent may claim the task.
    pub assigned_to: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Structured result written on completion.
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub parent_task_id: Option<String>,
    // -- Approval bookkeeping --
    pub needs_approval: bool,
    pub approval_status: Option<TaskApprovalStatus>,
    pub approval_type: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl Task {
    /// Create a new pending task. Priority is clamped to [1, 10].
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value, priority: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            repo_id: None,
            task_type: task_type.into(),
            priority: clamp_priority(priority),
            payload,
            status: TaskStatus::Pending,
            assigned_to: None,
            created_by: None,
            created_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
            result: None,
            error: None,
            parent_task_id: None,
            needs_approval: false,
            approval_status: None,
            approval_type: None,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
        }
    }

    pub fn with_repo(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = Some(repo_id.into());
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

    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Deduplication identifier for this task's payload, if any.
    ///
    /// Checked against pending/claimed tasks of the same type on create.
    pub fn dedup_identifier(&self) -> Option<&str> {
        payload_identifier(&self.payload)
    }
}

/// Extract the deduplication identifier from a task payload.
///
/// The queue recognises several identifier keys because payload schemas are
/// owned by their task-type handlers, not by the queue.
pub fn payload_identifier(payload: &serde_json::Value) -> Option<&str> {
    for key in ["title", "product_name", "name", "product"] {
        if let Some(value) = payload.get(key).and_then(|v| v.as_str()) {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// Task types universally claimable by every agent. Human instructions use
/// these to target a specific runner via `assigned_to`.
pub const UNIVERSAL_TASK_TYPES: &[&str] = &["directive", "human_directive"];

/// Task types an agent of the given type may claim from the unassigned pool.
///
/// Returns None for unknown agent ids, which a caller should treat as
/// "handles everything" only for the explicit catch-all agent.
pub fn agent_task_types(agent_id: &str) -> Option<Vec<&'static str>> {
    let specific: &[&str] = match agent_id {
        "pm" => &[
            "analyze_repo",
            "create_epic",
            "break_down_epic",
            "create_user_story",
            "prioritize_backlog",
            "triage_issue",
        ],
        "architect" => &[
            "evaluate_feasibility",
            "write_spec",
            "create_implementation_issue",
        ],
        "builder" => &[
            "implement_feature",
            "implement_fix",
            "implement_refactor",
            "address_review_feedback",
        ],
        "reviewer" => &["review_mr"],
        "tester" => &[
            "write_tests",
            "run_tests",
            "validate_feature",
            "analyze_coverage",
        ],
        "security" => &["security_scan", "dependency_audit", "compliance_check"],
        "devops" => &["manage_pipeline", "deploy", "rollback", "fix_build"],
        "bug_finder" => &["static_analysis", "bug_hunt"],
        _ => return None,
    };

    let mut types: Vec<&'static str> = specific.to_vec();
    types.extend_from_slice(UNIVERSAL_TASK_TYPES);
    Some(types)
}
