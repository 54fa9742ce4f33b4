//! Cron-driven task emission and internal maintenance jobs.
//!
//! A minute-resolution evaluator over the configured job catalog. Most jobs
//! emit tasks through the orchestrator; a couple run directly (issue
//! polling, auto feature creation) because they gate on external state.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde_json::json;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AutoFeatureConfig, Config, ForgeProvider, JobConfig, Repo};
use crate::domain::ports::{ForgeClient, IssueQuery};
use crate::services::orchestrator::{NewTask, Orchestrator};

/// Minute-resolution cron expression: minute hour day month weekday.
///
/// Fields support `*`, single values, `a-b` ranges, `a,b,c` lists and
/// `*/n` steps. Weekday runs 0-6 with Sunday as 0.
#[derive(Debug, Clone)]
pub struct CronExpression {
    minute: HashSet<u32>,
    hour: HashSet<u32>,
    day: HashSet<u32>,
    month: HashSet<u32>,
    weekday: HashSet<u32>,
}

impl CronExpression {
    pub fn parse(expression: &str) -> DomainResult<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(DomainError::ValidationFailed(format!(
                "Invalid cron expression: {expression}"
            )));
        }

        Ok(Self {
            minute: parse_field(parts[0], 0, 59)?,
            hour: parse_field(parts[1], 0, 23)?,
            day: parse_field(parts[2], 1, 31)?,
            month: parse_field(parts[3], 1, 12)?,
            weekday: parse_field(parts[4], 0, 6)?,
        })
    }

    /// Whether the instant matches, at minute resolution.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.contains(&at.minute())
            && self.hour.contains(&at.hour())
            && self.day.contains(&at.day())
            && self.month.contains(&at.month())
            && self.weekday.contains(&at.weekday().num_days_from_sunday())
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> DomainResult<HashSet<u32>> {
    if field == "*" {
        return Ok((min..=max).collect());
    }

    let invalid = || DomainError::ValidationFailed(format!("Invalid cron field: {field}"));
    let mut values = HashSet::new();

    for part in field.split(',') {
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.parse().map_err(|_| invalid())?;
            let end: u32 = end.parse().map_err(|_| invalid())?;
            if start > end || end > max {
                return Err(invalid());
            }
            values.extend(start..=end);
        } else if let Some((base, step)) = part.split_once('/') {
            let step: u32 = step.parse().map_err(|_| invalid())?;
            if step == 0 {
                return Err(invalid());
            }
            let start = if base == "*" {
                min
            } else {
                base.parse().map_err(|_| invalid())?
            };
            values.extend((start..=max).step_by(step as usize));
        } else {
            let value: u32 = part.parse().map_err(|_| invalid())?;
            if value < min || value > max {
                return Err(invalid());
            }
            values.insert(value);
        }
    }

    Ok(values)
}

/// One catalog entry with its firing state.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub name: String,
    pub agent: String,
    pub task_type: String,
    pub cron: CronExpression,
    pub enabled: bool,
    pub description: String,
    last_run: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn from_config(name: &str, config: &JobConfig) -> DomainResult<Self> {
        Ok(Self {
            name: name.to_string(),
            agent: config.agent.clone(),
            task_type: config.task_type.clone(),
            cron: CronExpression::parse(&config.cron)?,
            enabled: config.enabled,
            description: config.description.clone(),
            last_run: None,
        })
    }

    /// Cron match, at most once per minute. Survives evaluator restarts
    /// inside the minute because the check is against the stored last run.
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled || !self.cron.matches(now) {
            return false;
        }
        match self.last_run {
            Some(last) => truncate_to_minute(last) != truncate_to_minute(now),
            None => true,
        }
    }

    pub fn mark_run(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }
}

fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

/// Names of jobs executed in-process instead of emitting tasks.
const JOB_POLL_ISSUES: &str = "poll_gitlab_issues";
const JOB_AUTO_FEATURE: &str = "auto_feature_creation";

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    forge: Arc<dyn ForgeClient>,
    jobs: Vec<ScheduledJob>,
    auto_feature: AutoFeatureConfig,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, forge: Arc<dyn ForgeClient>, config: &Config) -> Self {
        let mut jobs = Vec::new();
        if config.scheduling.enabled {
            for (name, job_config) in &config.scheduling.jobs {
                match ScheduledJob::from_config(name, job_config) {
                    Ok(job) => {
                        tracing::info!(
                            job = %job.name,
                            enabled = job.enabled,
                            "Loaded scheduled job"
                        );
                        jobs.push(job);
                    }
                    Err(e) => tracing::error!(job = %name, "Failed to load job: {e}"),
                }
            }
        } else {
            tracing::info!("Scheduling is disabled in config");
        }
        jobs.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            orchestrator,
            forge,
            jobs,
            auto_feature: config.product.auto_feature_creation.clone(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// Minute loop: evaluate every job, then sleep to the next minute.
    pub async fn run(&mut self) {
        tracing::info!(jobs = self.jobs.len(), "Scheduler running");
        while !self.shutdown.load(Ordering::SeqCst) {
            let now = Utc::now();
            self.check_jobs(now).await;

            let to_next_minute = 60 - u64::from(Utc::now().second()).min(59);
            let mut remaining = Duration::from_secs(to_next_minute);
            while remaining > Duration::ZERO && !self.shutdown.load(Ordering::SeqCst) {
                let step = remaining.min(Duration::from_secs(1));
                tokio::time::sleep(step).await;
                remaining = remaining.saturating_sub(step);
            }
        }
        tracing::info!("Scheduler stopped");
    }

    /// Run every due job once for this minute.
    pub async fn check_jobs(&mut self, now: DateTime<Utc>) {
        let due: Vec<usize> = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.should_run(now))
            .map(|(index, _)| index)
            .collect();

        for index in due {
            let job = self.jobs[index].clone();
            if let Err(e) = self.run_job(&job, now).await {
                tracing::error!(job = %job.name, "Failed to run scheduled job: {e}");
            }
            self.jobs[index].mark_run(now);
        }
    }

    /// Manually trigger a job, bypassing its cron. Returns false for an
    /// unknown name.
    pub async fn run_job_now(&mut self, job_name: &str) -> DomainResult<bool> {
        let now = Utc::now();
        let Some(index) = self.jobs.iter().position(|j| j.name == job_name) else {
            return Ok(false);
        };
        let job = self.jobs[index].clone();
        self.run_job(&job, now).await?;
        self.jobs[index].mark_run(now);
        Ok(true)
    }

    async fn run_job(&self, job: &ScheduledJob, now: DateTime<Utc>) -> DomainResult<()> {
        tracing::info!(job = %job.name, task_type = %job.task_type, "Running scheduled job");

        if job.task_type == JOB_POLL_ISSUES {
            return self.poll_issues(now).await;
        }

        let guidance = if job.task_type == JOB_AUTO_FEATURE {
            if !self.auto_feature.enabled {
                tracing::info!("Auto feature creation disabled, skipping");
                return Ok(());
            }
            let Some(progress) = guidance_progress(Path::new(&self.auto_feature.guidance_path))
            else {
                tracing::info!("Auto feature creation skipped: no open guidance items");
                return Ok(());
            };
            Some(progress)
        } else {
            None
        };

        let repos = self.orchestrator.list_repos(true).await?;
        // With no repos registered the job still fires once, globally.
        let targets: Vec<Option<Repo>> = if repos.is_empty() {
            vec![None]
        } else {
            repos.into_iter().map(Some).collect()
        };

        for repo in targets {
            if let Some(repo) = &repo {
                if !job_enabled_for_repo(job, repo) {
                    continue;
                }
                if job.task_type == JOB_AUTO_FEATURE
                    && !self.auto_feature_repo_ready(repo).await
                {
                    continue;
                }
            }

            let mut payload = json!({
                "source": "scheduler",
                "job_name": job.name,
                "scheduled_time": now.to_rfc3339(),
                "description": job.description,
            });
            if let Some((pending, total)) = guidance {
                payload["auto_feature"] = json!({
                    "guidance_path": self.auto_feature.guidance_path,
                    "max_new_issues_per_run": self.auto_feature.max_new_issues_per_run,
                    "max_open_issues": self.auto_feature.max_open_issues,
                    "label": self.auto_feature.label,
                    "pending_requirements": pending,
                    "total_requirements": total,
                });
            }

            let mut new_task = NewTask::new(job.task_type.clone(), payload)
                .with_priority(3)
                .with_created_by("scheduler");
            if let Some(repo) = &repo {
                new_task = new_task.with_repo(repo.id.clone());
            }

            if let Some(task) = self.orchestrator.create_task(new_task).await? {
                tracing::info!(
                    task_id = %task.id,
                    job = %job.name,
                    repo_id = repo.as_ref().map_or("-", |r| r.id.as_str()),
                    "Created task for scheduled job"
                );
            }
        }

        Ok(())
    }

    /// Poll forge issues as a fallback for missing webhooks.
    ///
    /// Uses the per-repo cursor with a five-minute overlap, de-duplicates
    /// against the processed-event log, emits triage tasks, then advances
    /// the cursor.
    async fn poll_issues(&self, now: DateTime<Utc>) -> DomainResult<()> {
        let repos = self.orchestrator.list_repos(true).await?;
        if repos.is_empty() {
            tracing::info!("No repos available for issue polling");
            return Ok(());
        }

        for mut repo in repos {
            if repo.provider != ForgeProvider::Gitlab || !repo.polling_enabled() {
                continue;
            }

            let lookback_hours = repo
                .settings
                .get("polling")
                .and_then(|p| p.get("lookback_hours"))
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(24);
            let updated_after = repo
                .polling_cursor()
                .and_then(|cursor| DateTime::parse_from_rfc3339(cursor).ok())
                .map_or_else(
                    || now - chrono::Duration::hours(lookback_hours),
                    |cursor| cursor.with_timezone(&Utc) - chrono::Duration::minutes(5),
                );

            let issues = match self
                .forge
                .list_issues(
                    &repo,
                    IssueQuery {
                        state: Some("opened".to_string()),
                        updated_after: Some(updated_after.to_rfc3339()),
                        labels: vec![],
                        per_page: 100,
                    },
                )
                .await
            {
                Ok(issues) => issues,
                Err(e) => {
                    tracing::warn!(repo = %repo.name, "Failed to poll issues: {e}");
                    continue;
                }
            };

            for issue in issues {
                let issue_id = issue.id.to_string();
                if self
                    .orchestrator
                    .is_event_processed(&issue_id, &repo.id, "open")
                    .await?
                {
                    continue;
                }

                let payload = json!({
                    "source": "poll",
                    "event_type": "issue",
                    "action": "open",
                    "repo_id": repo.id,
                    "timestamp": now.to_rfc3339(),
                    "repo": {
                        "id": repo.id,
                        "autonomy_mode": repo.autonomy_mode.as_str(),
                    },
                    "project": {
                        "id": repo.project_ref,
                        "name": repo.name,
                        "path_with_namespace": repo.project_ref,
                        "web_url": format!("{}/{}", repo.forge_base_url.trim_end_matches('/'), repo.project_ref),
                        "default_branch": repo.default_branch,
                    },
                    "issue": {
                        "iid": issue.iid,
                        "title": issue.title,
                        "description": issue.description,
                        "state": issue.state,
                        "labels": issue.labels,
                        "url": issue.web_url,
                    },
                });

                let created = self
                    .orchestrator
                    .create_task(
                        NewTask::new("triage_issue", payload)
                            .with_repo(repo.id.clone())
                            .with_created_by("scheduler"),
                    )
                    .await?;
                if created.is_some() {
                    tracing::info!(issue = issue.iid, repo = %repo.name, "Created triage task from poll");
                }
                self.orchestrator
                    .mark_event_processed(&issue_id, &repo.id, "open")
                    .await?;
            }

            // Advance the cursor only after a successful pass.
            if !repo.settings.is_object() {
                repo.settings = json!({});
            }
            repo.settings["polling"]["last_polled_at"] = json!(now.to_rfc3339());
            if let Err(e) = self.orchestrator.update_repo(&repo).await {
                tracing::warn!(repo = %repo.name, "Failed to advance polling cursor: {e}");
            }
        }

        Ok(())
    }

    /// Open-issue cap gate for auto feature creation.
    async fn auto_feature_repo_ready(&self, repo: &Repo) -> bool {
        if repo.provider != ForgeProvider::Gitlab {
            tracing::warn!(repo = %repo.name, "Auto feature creation only supports gitlab repos");
            return false;
        }

        let query = IssueQuery {
            state: Some("opened".to_string()),
            updated_after: None,
            labels: vec![self.auto_feature.label.clone()],
            per_page: self.auto_feature.max_open_issues + 1,
        };
        match self.forge.list_issues(repo, query).await {
            Ok(issues) => {
                if issues.len() >= self.auto_feature.max_open_issues {
                    tracing::info!(
                        open = issues.len(),
                        cap = self.auto_feature.max_open_issues,
                        label = %self.auto_feature.label,
                        "Auto feature creation skipped: open-issue cap reached"
                    );
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                tracing::warn!("Failed to check open auto-feature issues: {e}");
                false
            }
        }
    }
}

/// Per-repo job override: `settings.scheduling.{job}.enabled` beats the
/// catalog-level flag.
fn job_enabled_for_repo(job: &ScheduledJob, repo: &Repo) -> bool {
    repo.scheduling_override(&job.name).unwrap_or(job.enabled)
}

/// Count open/total requirements in a markdown checklist. Returns None when
/// the file is missing, has no checklist bullets, or everything is checked.
fn guidance_progress(path: &Path) -> Option<(usize, usize)> {
    let content = std::fs::read_to_string(path).ok()?;

    let mut total = 0;
    let mut pending = 0;
    for line in content.lines() {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed
            .strip_prefix("- [")
            .or_else(|| trimmed.strip_prefix("* ["))
        else {
            continue;
        };
        let mut chars = rest.chars();
        let state = chars.next()?;
        if chars.next() != Some(']') {
            continue;
        }
        let item = chars.as_str().trim();
        if item.is_empty() {
            continue;
        }
        match state {
            ' ' => {
                total += 1;
                pending += 1;
            }
            'x' | 'X' => total += 1,
            _ => {}
        }
    }

    if total == 0 || pending == 0 {
        None
    } else {
        Some((pending, total))
    }
}
