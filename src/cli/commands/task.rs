//! Task subcommands.

use anyhow::{bail, Result};

use crate::cli::display;
use crate::domain::models::TaskStatus;
use crate::domain::ports::TaskFilter;
use crate::services::orchestrator::{NewTask, Orchestrator};

#[allow(clippy::too_many_arguments)]
pub async fn handle_submit(
    orchestrator: &Orchestrator,
    task_type: String,
    payload: &str,
    priority: i64,
    repo: Option<String>,
    assign: Option<String>,
    allow_duplicates: bool,
    json: bool,
) -> Result<()> {
    let payload: serde_json::Value = serde_json::from_str(payload)?;
    let mut new_task = NewTask::new(task_type, payload)
        .with_priority(priority)
        .with_created_by("cli");
    if let Some(repo) = repo {
        new_task = new_task.with_repo(repo);
    }
    if let Some(agent) = assign {
        new_task = new_task.with_assigned_to(agent);
    }
    if allow_duplicates {
        new_task = new_task.allowing_duplicates();
    }

    match orchestrator.create_task(new_task).await? {
        Some(task) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                println!("Created task {} ({}) priority {}", task.id, task.task_type, task.priority);
            }
            Ok(())
        }
        None => bail!("Duplicate task rejected; pass --allow-duplicates to force"),
    }
}

pub async fn handle_list(
    orchestrator: &Orchestrator,
    status: Option<String>,
    limit: i64,
    json: bool,
) -> Result<()> {
    let status = match status {
        Some(s) => match TaskStatus::from_str(&s) {
            Some(status) => Some(status),
            None => bail!("Unknown status: {s}"),
        },
        None => None,
    };

    let tasks = orchestrator
        .list_tasks(TaskFilter { status, limit: Some(limit), ..Default::default() })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    } else if tasks.is_empty() {
        println!("No tasks");
    } else {
        println!("{}", display::task_table(&tasks));
    }
    Ok(())
}

pub async fn handle_show(orchestrator: &Orchestrator, task_id: &str, json: bool) -> Result<()> {
    match orchestrator.get_task(task_id).await? {
        Some(task) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                println!("Task {}", task.id);
                println!("  type:        {}", task.task_type);
                println!("  status:      {}", task.status.as_str());
                println!("  priority:    {}", task.priority);
                println!("  repo:        {}", task.repo_id.as_deref().unwrap_or("-"));
                println!("  assigned_to: {}", task.assigned_to.as_deref().unwrap_or("-"));
                println!("  created_by:  {}", task.created_by.as_deref().unwrap_or("-"));
                println!("  created_at:  {}", task.created_at.to_rfc3339());
                if let Some(claimed_at) = task.claimed_at {
                    println!("  claimed_at:  {}", claimed_at.to_rfc3339());
                }
                if let Some(completed_at) = task.completed_at {
                    println!("  completed:   {}", completed_at.to_rfc3339());
                }
                if let Some(error) = &task.error {
                    println!("  error:       {error}");
                }
                println!("  payload:     {}", serde_json::to_string_pretty(&task.payload)?);
                if let Some(result) = &task.result {
                    println!("  result:      {}", serde_json::to_string_pretty(result)?);
                }
            }
            Ok(())
        }
        None => bail!("Task not found: {task_id}"),
    }
}

pub async fn handle_cancel(
    orchestrator: &Orchestrator,
    task_id: &str,
    reason: &str,
    json: bool,
) -> Result<()> {
    let cancelled = orchestrator.cancel_task(task_id, reason, Some("cli")).await?;
    if json {
        println!("{}", serde_json::json!({"cancelled": cancelled}));
    } else if cancelled {
        println!("Cancelled task {task_id}");
    } else {
        bail!("Task not cancellable (missing or already terminal): {task_id}");
    }
    Ok(())
}
