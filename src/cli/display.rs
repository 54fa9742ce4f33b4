//! Table rendering for CLI output.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use console::style;

use crate::domain::models::{AgentStatus, Approval, Repo, Task, TaskStatus};

pub fn task_table(tasks: &[Task]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["ID", "Type", "Prio", "Status", "Assigned", "Repo", "Created"]);
    for task in tasks {
        table.add_row(vec![
            Cell::new(short_id(&task.id)),
            Cell::new(&task.task_type),
            Cell::new(task.priority),
            Cell::new(status_label(task.status)),
            Cell::new(task.assigned_to.as_deref().unwrap_or("-")),
            Cell::new(task.repo_id.as_deref().unwrap_or("-")),
            Cell::new(task.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }
    table
}

pub fn approval_table(approvals: &[Approval]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["ID", "Type", "Title", "Status", "Submitted by", "Created"]);
    for approval in approvals {
        table.add_row(vec![
            Cell::new(short_id(&approval.id)),
            Cell::new(approval.approval_type.as_str()),
            Cell::new(&approval.title),
            Cell::new(approval.status.as_str()),
            Cell::new(&approval.submitted_by),
            Cell::new(approval.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }
    table
}

pub fn repo_table(repos: &[Repo]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["ID", "Name", "Provider", "Project", "Autonomy", "Active"]);
    for repo in repos {
        table.add_row(vec![
            Cell::new(short_id(&repo.id)),
            Cell::new(&repo.name),
            Cell::new(repo.provider.as_str()),
            Cell::new(&repo.project_ref),
            Cell::new(repo.autonomy_mode.as_str()),
            Cell::new(if repo.active { "yes" } else { "no" }),
        ]);
    }
    table
}

pub fn agent_table(statuses: &[AgentStatus]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Agent", "State", "Current task", "Completed", "Tokens", "Heartbeat"]);
    for status in statuses {
        table.add_row(vec![
            Cell::new(&status.agent_id),
            Cell::new(status.state.as_str()),
            Cell::new(status.current_task_id.as_deref().map(short_id).unwrap_or_else(|| "-".to_string())),
            Cell::new(status.tasks_completed),
            Cell::new(status.tokens_used),
            Cell::new(status.last_heartbeat.format("%H:%M:%S")),
        ]);
    }
    table
}

fn status_label(status: TaskStatus) -> String {
    let label = status.as_str();
    match status {
        TaskStatus::Completed => style(label).green().to_string(),
        TaskStatus::Failed => style(label).red().to_string(),
        TaskStatus::Cancelled => style(label).dim().to_string(),
        TaskStatus::InProgress | TaskStatus::Claimed => style(label).yellow().to_string(),
        TaskStatus::Pending => label.to_string(),
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}
