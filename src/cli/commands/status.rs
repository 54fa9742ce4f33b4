//! Fleet status command.

use anyhow::Result;

use crate::cli::display;
use crate::domain::models::TaskStatus;
use crate::services::orchestrator::Orchestrator;

pub async fn handle_status(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    let statuses = orchestrator.agent_statuses().await?;
    let counts = orchestrator.queue_stats().await?;

    if json {
        let counts: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(status, count)| (status.as_str().to_string(), (*count).into()))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "agents": statuses,
                "queue": counts,
            }))?
        );
        return Ok(());
    }

    if statuses.is_empty() {
        println!("No agents have reported yet");
    } else {
        println!("{}", display::agent_table(&statuses));
    }

    let order = [
        TaskStatus::Pending,
        TaskStatus::Claimed,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];
    let line: Vec<String> = order
        .iter()
        .map(|status| format!("{}: {}", status.as_str(), counts.get(status).copied().unwrap_or(0)))
        .collect();
    println!("queue  {}", line.join("  "));
    Ok(())
}
