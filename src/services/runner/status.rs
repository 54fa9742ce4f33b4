//! Runner status files.
//!
//! Each runner writes a local JSON snapshot only it owns; peers read the
//! others for concurrency-cap counting, and the dashboard reads them all.
//! The schema is additive; readers tolerate unknown keys.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Status file contents. Only the fields peers rely on are required; the
/// rest is dashboard garnish.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerStatus {
    pub agent_id: String,
    pub agent_name: String,
    pub is_running: bool,
    pub current_session: Option<SessionSnapshot>,
    pub current_task: Option<TaskSnapshot>,
    pub total_sessions: u64,
    pub total_tokens_today: i64,
    pub consecutive_failures: u32,
    pub last_restart: Option<String>,
    pub rate_limit: RateLimitSnapshot,
    pub token_budget: BudgetSnapshot,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSnapshot {
    pub id: Option<String>,
    pub start_time: Option<String>,
    pub provider: Option<String>,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSnapshot {
    pub id: Option<String>,
    pub task_type: Option<String>,
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSnapshot {
    pub limited: bool,
    pub reset_time: Option<String>,
    pub wait_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSnapshot {
    pub daily_limit: i64,
    pub used: i64,
}

impl RunnerStatus {
    /// Whether this runner counts against the fleet concurrency cap:
    /// a live session working a task and not paused on a rate limit.
    pub fn is_working(&self) -> bool {
        let has_session = self.is_running
            && self.current_session.as_ref().is_some_and(|s| s.id.is_some());
        let has_task = self.current_task.as_ref().is_some_and(|t| t.id.is_some());
        has_session && has_task && !self.rate_limit.limited
    }
}

/// Path of one runner's status file under the control directory.
pub fn status_file_path(control_dir: &Path, agent_id: &str) -> PathBuf {
    control_dir.join(format!("runner_status_{agent_id}.json"))
}

/// Write a status snapshot. Only the owning runner calls this.
pub fn write_status(control_dir: &Path, status: &RunnerStatus) -> std::io::Result<()> {
    std::fs::create_dir_all(control_dir)?;
    let path = status_file_path(control_dir, &status.agent_id);
    let data = serde_json::to_string_pretty(status)?;
    std::fs::write(path, data)
}

/// Count peers currently working, excluding the given agent. Malformed or
/// unreadable status files are skipped.
pub fn count_working_peers(control_dir: &Path, own_agent_id: &str) -> usize {
    let own_file = format!("runner_status_{own_agent_id}.json");
    let Ok(entries) = std::fs::read_dir(control_dir) else {
        return 0;
    };

    let mut working = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with("runner_status_") || !name.ends_with(".json") || name == own_file {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        match serde_json::from_str::<RunnerStatus>(&text) {
            Ok(status) if status.is_working() => working += 1,
            Ok(_) => {}
            Err(e) => tracing::debug!("Skipping status file {name}: {e}"),
        }
    }
    working
}

/// Whether the agent's enable flag says it should run. The side channel is
/// a marker file: present means disabled, absent means enabled.
pub fn is_agent_enabled(control_dir: &Path, agent_id: &str) -> bool {
    !control_dir
        .join("agents")
        .join(format!("{agent_id}.disabled"))
        .exists()
}
