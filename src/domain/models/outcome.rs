//! Task outcome records.
//!
//! Append-only; feeds downstream learning and analytics. Never read by
//! task-state logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a task execution ended, from the runner's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Failure,
    Partial,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Partial => "partial",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

/// One execution outcome, keyed by task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub repo_id: Option<String>,
    pub agent_id: String,
    pub task_type: String,
    pub outcome: OutcomeKind,
    pub duration_seconds: Option<i64>,
    pub error_summary: Option<String>,
    pub context_summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskOutcome {
    pub fn new(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        task_type: impl Into<String>,
        outcome: OutcomeKind,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            repo_id: None,
            agent_id: agent_id.into(),
            task_type: task_type.into(),
            outcome,
            duration_seconds: None,
            error_summary: None,
            context_summary: None,
            created_at: Utc::now(),
        }
    }
}

/// Per-session token usage, recorded by the runner after each worker exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub agent_id: String,
    pub session_id: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub recorded_at: DateTime<Utc>,
}
