//! Approval subcommands.

use anyhow::{bail, Result};

use crate::cli::display;
use crate::services::orchestrator::Orchestrator;

pub async fn handle_list(
    orchestrator: &Orchestrator,
    all: bool,
    limit: i64,
    json: bool,
) -> Result<()> {
    let approvals = if all {
        orchestrator.all_approvals(limit).await?
    } else {
        orchestrator.pending_approvals().await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&approvals)?);
    } else if approvals.is_empty() {
        println!("No approvals");
    } else {
        println!("{}", display::approval_table(&approvals));
    }
    Ok(())
}

pub async fn handle_approve(
    orchestrator: &Orchestrator,
    approval_id: &str,
    notes: Option<&str>,
    json: bool,
) -> Result<()> {
    let approved = orchestrator.approve(approval_id, notes).await?;
    if json {
        println!("{}", serde_json::json!({"approved": approved}));
    } else if approved {
        println!("Approved {approval_id}");
    } else {
        bail!("Approval not pending or not found: {approval_id}");
    }
    Ok(())
}

pub async fn handle_reject(
    orchestrator: &Orchestrator,
    approval_id: &str,
    notes: &str,
    json: bool,
) -> Result<()> {
    let rejected = orchestrator.reject(approval_id, notes).await?;
    if json {
        println!("{}", serde_json::json!({"rejected": rejected}));
    } else if rejected {
        println!("Rejected {approval_id}");
    } else {
        bail!("Approval not pending or not found: {approval_id}");
    }
    Ok(())
}
