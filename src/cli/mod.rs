//! Command-line interface.

pub mod commands;
pub mod display;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "foreman", version, about = "Multi-tenant orchestrator for autonomous code-writing agents")]
pub struct Cli {
    /// Path to a config file (defaults to .foreman/config.yaml + overrides).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the webhook ingress server.
    Serve,
    /// Run the supervision loop for one agent type.
    Runner {
        /// Agent id (pm, architect, builder, reviewer, tester, security,
        /// devops, bug_finder).
        #[arg(long)]
        agent: String,
    },
    /// Run the cron scheduler.
    Scheduler,
    /// Task queue operations.
    #[command(subcommand)]
    Task(TaskCommands),
    /// Approval queue operations.
    #[command(subcommand)]
    Approval(ApprovalCommands),
    /// Repo registry operations.
    #[command(subcommand)]
    Repo(RepoCommands),
    /// Fleet status: agents and queue counts.
    Status,
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Submit a task to the queue.
    Submit {
        /// Task type from the catalog (implement_feature, review_mr, ...).
        task_type: String,
        /// JSON payload.
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long, default_value_t = 5)]
        priority: i64,
        #[arg(long)]
        repo: Option<String>,
        /// Bind the task to one agent, bypassing its type catalog.
        #[arg(long)]
        assign: Option<String>,
        #[arg(long)]
        allow_duplicates: bool,
    },
    /// List tasks.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show one task.
    Show { task_id: String },
    /// Cancel a non-terminal task.
    Cancel {
        task_id: String,
        #[arg(long, default_value = "cancelled from CLI")]
        reason: String,
    },
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List approvals (pending by default).
    List {
        #[arg(long)]
        all: bool,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Approve a pending decision.
    Approve {
        approval_id: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Reject a pending decision.
    Reject {
        approval_id: String,
        #[arg(long)]
        notes: String,
    },
}

#[derive(Subcommand)]
pub enum RepoCommands {
    /// List registered repos.
    List {
        #[arg(long)]
        all: bool,
    },
    /// Register a repo.
    Add {
        name: String,
        #[arg(long, default_value = "gitlab")]
        provider: String,
        #[arg(long)]
        forge_url: String,
        /// Forge project path or numeric id.
        #[arg(long)]
        project: String,
        #[arg(long)]
        slug: String,
        #[arg(long, default_value = "guided")]
        autonomy: String,
    },
    /// Deactivate a repo (soft delete).
    Disable { repo_id: String },
}
