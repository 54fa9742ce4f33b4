//! Repo subcommands.

use anyhow::{bail, Result};

use crate::cli::display;
use crate::domain::models::{AutonomyMode, ForgeProvider, Repo};
use crate::services::orchestrator::Orchestrator;

pub async fn handle_list(orchestrator: &Orchestrator, all: bool, json: bool) -> Result<()> {
    let repos = orchestrator.list_repos(!all).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&repos)?);
    } else if repos.is_empty() {
        println!("No repos registered");
    } else {
        println!("{}", display::repo_table(&repos));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_add(
    orchestrator: &Orchestrator,
    name: String,
    provider: &str,
    forge_url: String,
    project: String,
    slug: String,
    autonomy: &str,
    json: bool,
) -> Result<()> {
    let Some(provider) = ForgeProvider::from_str(provider) else {
        bail!("Unknown provider: {provider} (expected gitlab or github)");
    };
    let Some(autonomy) = AutonomyMode::from_str(autonomy) else {
        bail!("Unknown autonomy mode: {autonomy} (expected guided or full)");
    };

    let repo = Repo::new(name, provider, forge_url, project, slug).with_autonomy_mode(autonomy);
    orchestrator.create_repo(&repo).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&repo)?);
    } else {
        println!("Registered repo {} ({})", repo.name, repo.id);
    }
    Ok(())
}

pub async fn handle_disable(orchestrator: &Orchestrator, repo_id: &str, json: bool) -> Result<()> {
    let disabled = orchestrator.deactivate_repo(repo_id).await?;
    if json {
        println!("{}", serde_json::json!({"disabled": disabled}));
    } else if disabled {
        println!("Deactivated repo {repo_id}");
    } else {
        bail!("Repo not found: {repo_id}");
    }
    Ok(())
}
