//! Scheduler integration: task-emitting jobs, per-repo gating, issue
//! polling with cursor advance and de-duplication, auto feature guards.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use foreman::adapters::sqlite::create_migrated_test_pool;
use foreman::domain::errors::DomainResult;
use foreman::domain::models::{Config, ForgeProvider, JobConfig, Repo};
use foreman::domain::ports::{ForgeClient, ForgeIssue, IssueQuery, LogNotifier, NewIssue, TaskFilter};
use foreman::services::orchestrator::Orchestrator;
use foreman::services::scheduler::Scheduler;

/// Canned forge: issues per project_ref, with a call log.
#[derive(Default)]
struct FakeForge {
    issues: Mutex<HashMap<String, Vec<ForgeIssue>>>,
    queries: Mutex<Vec<IssueQuery>>,
}

impl FakeForge {
    async fn put_issues(&self, project_ref: &str, issues: Vec<ForgeIssue>) {
        self.issues.lock().await.insert(project_ref.to_string(), issues);
    }
}

#[async_trait]
impl ForgeClient for FakeForge {
    async fn list_issues(&self, repo: &Repo, query: IssueQuery) -> DomainResult<Vec<ForgeIssue>> {
        self.queries.lock().await.push(query.clone());
        Ok(self
            .issues
            .lock()
            .await
            .get(&repo.project_ref)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_issue(&self, _repo: &Repo, issue: NewIssue) -> DomainResult<ForgeIssue> {
        Ok(ForgeIssue {
            id: 1,
            iid: 1,
            title: issue.title,
            description: Some(issue.description),
            state: "opened".to_string(),
            labels: issue.labels,
            web_url: None,
            updated_at: None,
        })
    }

    async fn comment_on_issue(&self, _repo: &Repo, _issue_iid: i64, _body: &str) -> DomainResult<()> {
        Ok(())
    }
}

fn issue(id: i64, iid: i64, title: &str) -> ForgeIssue {
    ForgeIssue {
        id,
        iid,
        title: title.to_string(),
        description: None,
        state: "opened".to_string(),
        labels: vec![],
        web_url: Some(format!("https://g/issues/{iid}")),
        updated_at: None,
    }
}

async fn setup(config: Config) -> (Arc<Orchestrator>, Arc<FakeForge>, Scheduler) {
    let pool = create_migrated_test_pool().await.unwrap();
    let orchestrator = Arc::new(Orchestrator::sqlite(pool, Arc::new(LogNotifier), 7200));
    let forge = Arc::new(FakeForge::default());
    let scheduler = Scheduler::new(orchestrator.clone(), forge.clone(), &config);
    (orchestrator, forge, scheduler)
}

fn config_with_job(name: &str, task_type: &str) -> Config {
    let mut config = Config::default();
    config.scheduling.jobs.insert(
        name.to_string(),
        JobConfig {
            agent: "security".to_string(),
            task_type: task_type.to_string(),
            cron: "* * * * *".to_string(),
            enabled: true,
            description: "test job".to_string(),
        },
    );
    config
}

#[tokio::test]
async fn task_emitting_job_fans_out_per_repo() {
    let (orchestrator, _, mut scheduler) = setup(config_with_job("audit", "security_scan")).await;

    for i in 0..2 {
        let repo = Repo::new(
            format!("repo-{i}"),
            ForgeProvider::Gitlab,
            "https://g",
            format!("g/repo-{i}"),
            format!("repo-{i}"),
        );
        orchestrator.create_repo(&repo).await.unwrap();
    }

    assert!(scheduler.run_job_now("audit").await.unwrap());

    let tasks = orchestrator.list_tasks(TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 2, "one task per active repo");
    for task in &tasks {
        assert_eq!(task.task_type, "security_scan");
        assert_eq!(task.priority, 3);
        assert_eq!(task.created_by.as_deref(), Some("scheduler"));
        assert_eq!(task.payload["source"], "scheduler");
        assert_eq!(task.payload["job_name"], "audit");
    }
}

#[tokio::test]
async fn per_repo_override_disables_job() {
    let (orchestrator, _, mut scheduler) = setup(config_with_job("audit", "security_scan")).await;

    let opted_out = Repo::new("quiet", ForgeProvider::Gitlab, "https://g", "g/quiet", "quiet")
        .with_settings(json!({"scheduling": {"audit": {"enabled": false}}}));
    orchestrator.create_repo(&opted_out).await.unwrap();
    let normal = Repo::new("loud", ForgeProvider::Gitlab, "https://g", "g/loud", "loud");
    orchestrator.create_repo(&normal).await.unwrap();

    scheduler.run_job_now("audit").await.unwrap();

    let tasks = orchestrator.list_tasks(TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].repo_id.as_deref(), Some(normal.id.as_str()));
}

#[tokio::test]
async fn unknown_job_returns_false() {
    let (_, _, mut scheduler) = setup(config_with_job("audit", "security_scan")).await;
    assert!(!scheduler.run_job_now("nope").await.unwrap());
}

#[tokio::test]
async fn polling_emits_once_and_advances_cursor() {
    let (orchestrator, forge, mut scheduler) =
        setup(config_with_job("poll", "poll_gitlab_issues")).await;

    let repo = Repo::new("demo", ForgeProvider::Gitlab, "https://g", "g/demo", "demo");
    orchestrator.create_repo(&repo).await.unwrap();
    forge
        .put_issues("g/demo", vec![issue(100, 1, "Crash on save"), issue(101, 2, "Slow load")])
        .await;

    scheduler.run_job_now("poll").await.unwrap();

    let tasks = orchestrator.list_tasks(TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.task_type == "triage_issue"));

    // Cursor advanced.
    let stored = orchestrator.get_repo(&repo.id).await.unwrap().unwrap();
    assert!(stored.polling_cursor().is_some());

    // A second poll re-lists the same issues but emits nothing new.
    scheduler.run_job_now("poll").await.unwrap();
    let tasks = orchestrator.list_tasks(TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 2, "processed-event log suppresses duplicates");
}

#[tokio::test]
async fn polling_skips_opted_out_and_non_gitlab_repos() {
    let (orchestrator, forge, mut scheduler) =
        setup(config_with_job("poll", "poll_gitlab_issues")).await;

    let opted_out = Repo::new("quiet", ForgeProvider::Gitlab, "https://g", "g/quiet", "quiet")
        .with_settings(json!({"polling": {"enabled": false}}));
    orchestrator.create_repo(&opted_out).await.unwrap();
    let github = Repo::new("gh", ForgeProvider::Github, "https://github.com", "org/gh", "gh");
    orchestrator.create_repo(&github).await.unwrap();

    forge.put_issues("g/quiet", vec![issue(1, 1, "ignored")]).await;
    forge.put_issues("org/gh", vec![issue(2, 2, "ignored")]).await;

    scheduler.run_job_now("poll").await.unwrap();
    assert!(orchestrator.list_tasks(TaskFilter::default()).await.unwrap().is_empty());
    assert!(forge.queries.lock().await.is_empty(), "no forge calls for skipped repos");
}

#[tokio::test]
async fn auto_feature_skips_without_guidance() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = config_with_job("features", "auto_feature_creation");
    config.product.auto_feature_creation.enabled = true;
    config.product.auto_feature_creation.guidance_path =
        dir.path().join("guidance.md").display().to_string();

    let (orchestrator, _, mut scheduler) = setup(config).await;
    let repo = Repo::new("demo", ForgeProvider::Gitlab, "https://g", "g/demo", "demo");
    orchestrator.create_repo(&repo).await.unwrap();

    // Missing guidance file: job runs but emits nothing.
    scheduler.run_job_now("features").await.unwrap();
    assert!(orchestrator.list_tasks(TaskFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn auto_feature_emits_with_open_items_under_cap() {
    let dir = tempfile::TempDir::new().unwrap();
    let guidance_path = dir.path().join("guidance.md");
    std::fs::write(&guidance_path, "- [ ] exports\n- [x] onboarding\n").unwrap();

    let mut config = config_with_job("features", "auto_feature_creation");
    config.product.auto_feature_creation.enabled = true;
    config.product.auto_feature_creation.guidance_path = guidance_path.display().to_string();
    config.product.auto_feature_creation.max_open_issues = 3;

    let (orchestrator, forge, mut scheduler) = setup(config).await;
    let repo = Repo::new("demo", ForgeProvider::Gitlab, "https://g", "g/demo", "demo");
    orchestrator.create_repo(&repo).await.unwrap();
    forge.put_issues("g/demo", vec![issue(1, 1, "existing auto issue")]).await;

    scheduler.run_job_now("features").await.unwrap();

    let tasks = orchestrator.list_tasks(TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    let auto = &tasks[0].payload["auto_feature"];
    assert_eq!(auto["pending_requirements"], 1);
    assert_eq!(auto["total_requirements"], 2);
    assert_eq!(auto["max_open_issues"], 3);
}

#[tokio::test]
async fn auto_feature_respects_open_issue_cap() {
    let dir = tempfile::TempDir::new().unwrap();
    let guidance_path = dir.path().join("guidance.md");
    std::fs::write(&guidance_path, "- [ ] exports\n").unwrap();

    let mut config = config_with_job("features", "auto_feature_creation");
    config.product.auto_feature_creation.enabled = true;
    config.product.auto_feature_creation.guidance_path = guidance_path.display().to_string();
    config.product.auto_feature_creation.max_open_issues = 2;

    let (orchestrator, forge, mut scheduler) = setup(config).await;
    let repo = Repo::new("demo", ForgeProvider::Gitlab, "https://g", "g/demo", "demo");
    orchestrator.create_repo(&repo).await.unwrap();
    forge
        .put_issues("g/demo", vec![issue(1, 1, "one"), issue(2, 2, "two")])
        .await;

    scheduler.run_job_now("features").await.unwrap();
    assert!(orchestrator.list_tasks(TaskFilter::default()).await.unwrap().is_empty());
}
