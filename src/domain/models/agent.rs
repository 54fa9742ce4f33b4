//! Agent status and inter-agent mail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reported state of an agent runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Error,
    Stopped,
    RateLimited,
    Waiting,
    Disabled,
    BudgetExceeded,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::RateLimited => "rate_limited",
            Self::Waiting => "waiting",
            Self::Disabled => "disabled",
            Self::BudgetExceeded => "budget_exceeded",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "running" | "working" => Some(Self::Running),
            "error" => Some(Self::Error),
            "stopped" | "offline" => Some(Self::Stopped),
            "rate_limited" => Some(Self::RateLimited),
            "waiting" => Some(Self::Waiting),
            "disabled" => Some(Self::Disabled),
            "budget_exceeded" => Some(Self::BudgetExceeded),
            _ => None,
        }
    }
}

/// Last reported status of one agent type.
///
/// TTL-like: a record whose heartbeat is older than the offline threshold is
/// treated as offline by readers regardless of the stored state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub repo_id: Option<String>,
    pub state: AgentState,
    pub current_task_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub tasks_completed: i64,
    pub tokens_used: i64,
}

impl AgentStatus {
    /// Whether the heartbeat is fresh enough to trust the stored state.
    pub fn is_online(&self, now: DateTime<Utc>, offline_after_secs: i64) -> bool {
        (now - self.last_heartbeat).num_seconds() < offline_after_secs
    }
}

/// Kind of inter-agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// The payload describes a task the recipient should enqueue.
    Handoff,
    /// Informational only.
    Info,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handoff => "handoff",
            Self::Info => "info",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "handoff" => Some(Self::Handoff),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

/// Advisory mail between runners. Drained each supervision iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub message_type: MessageType,
    pub payload: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            message_type,
            payload,
            read: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_heartbeat_freshness() {
        let now = Utc::now();
        let status = AgentStatus {
            agent_id: "builder".to_string(),
            repo_id: None,
            state: AgentState::Idle,
            current_task_id: None,
            last_heartbeat: now - Duration::seconds(30),
            tasks_completed: 0,
            tokens_used: 0,
        };
        assert!(status.is_online(now, 120));
        assert!(!status.is_online(now + Duration::seconds(120), 120));
    }

    #[test]
    fn test_state_aliases() {
        assert_eq!(AgentState::from_str("working"), Some(AgentState::Running));
        assert_eq!(AgentState::from_str("offline"), Some(AgentState::Stopped));
    }
}
