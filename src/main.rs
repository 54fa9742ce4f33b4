//! Foreman CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use foreman::adapters::sqlite::initialize_database;
use foreman::cli::{
    commands::{approval, repo, runner, scheduler, serve, status, task},
    ApprovalCommands, Cli, Commands, RepoCommands, TaskCommands,
};
use foreman::config::ConfigLoader;
use foreman::domain::ports::LogNotifier;
use foreman::services::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load().context("Failed to load configuration")?,
    };

    foreman::logging::init(&config.logging)?;

    let pool = initialize_database(&config.database.path, config.database.max_connections)
        .await
        .context("Failed to initialize database")?;

    let orchestrator = Arc::new(Orchestrator::sqlite(
        pool,
        Arc::new(LogNotifier),
        config.orchestrator.abandon_after_secs,
    ));

    match cli.command {
        Commands::Serve => serve::handle_serve(orchestrator, &config).await?,
        Commands::Runner { agent } => {
            runner::handle_runner(agent, orchestrator, config).await?;
        }
        Commands::Scheduler => scheduler::handle_scheduler(orchestrator, &config).await?,
        Commands::Task(task_cmd) => match task_cmd {
            TaskCommands::Submit {
                task_type,
                payload,
                priority,
                repo,
                assign,
                allow_duplicates,
            } => {
                task::handle_submit(
                    &orchestrator,
                    task_type,
                    &payload,
                    priority,
                    repo,
                    assign,
                    allow_duplicates,
                    cli.json,
                )
                .await?;
            }
            TaskCommands::List { status, limit } => {
                task::handle_list(&orchestrator, status, limit, cli.json).await?;
            }
            TaskCommands::Show { task_id } => {
                task::handle_show(&orchestrator, &task_id, cli.json).await?;
            }
            TaskCommands::Cancel { task_id, reason } => {
                task::handle_cancel(&orchestrator, &task_id, &reason, cli.json).await?;
            }
        },
        Commands::Approval(approval_cmd) => match approval_cmd {
            ApprovalCommands::List { all, limit } => {
                approval::handle_list(&orchestrator, all, limit, cli.json).await?;
            }
            ApprovalCommands::Approve { approval_id, notes } => {
                approval::handle_approve(&orchestrator, &approval_id, notes.as_deref(), cli.json)
                    .await?;
            }
            ApprovalCommands::Reject { approval_id, notes } => {
                approval::handle_reject(&orchestrator, &approval_id, &notes, cli.json).await?;
            }
        },
        Commands::Repo(repo_cmd) => match repo_cmd {
            RepoCommands::List { all } => {
                repo::handle_list(&orchestrator, all, cli.json).await?;
            }
            RepoCommands::Add {
                name,
                provider,
                forge_url,
                project,
                slug,
                autonomy,
            } => {
                repo::handle_add(
                    &orchestrator,
                    name,
                    &provider,
                    forge_url,
                    project,
                    slug,
                    &autonomy,
                    cli.json,
                )
                .await?;
            }
            RepoCommands::Disable { repo_id } => {
                repo::handle_disable(&orchestrator, &repo_id, cli.json).await?;
            }
        },
        Commands::Status => status::handle_status(&orchestrator, cli.json).await?,
    }

    Ok(())
}
