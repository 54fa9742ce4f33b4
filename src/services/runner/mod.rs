//! Agent runner supervision loop.
//!
//! One runner per agent type per process, one worker subprocess at a time.
//! Concurrency across the fleet is scheduled by the task queue, not by
//! threads: the runner claims a task, runs a worker to completion, reports
//! the outcome and goes back to the queue.

pub mod output;
pub mod status;
pub mod worker;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde_json::json;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    agent_task_types, AgentConfig, AgentState, Config, MessageType, OutcomeKind, ProviderConfig,
    Task, TaskOutcome, TokenUsage,
};
use crate::domain::ports::ReflectionClient;
use crate::services::orchestrator::{NewTask, Orchestrator};
use crate::services::rate_limit::RateLimitRegister;

use output::{detect_rate_limit_reset, extract_summary, output_excerpt, parse_token_usage};
use status::{
    count_working_peers, is_agent_enabled, write_status, BudgetSnapshot, RateLimitSnapshot,
    RunnerStatus, SessionSnapshot, TaskSnapshot,
};
use worker::{WorkerProcess, WorkerSpawn};

/// Restart back-off ceiling.
const MAX_RESTART_DELAY_SECS: u64 = 300;
/// Grace period between SIGTERM and SIGKILL when stopping a worker.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Bookkeeping for one worker session.
#[derive(Debug, Clone)]
struct SessionStats {
    session_id: String,
    started_at: DateTime<Utc>,
    provider: String,
}

/// Supervisor for one agent type.
pub struct AgentRunner {
    agent_id: String,
    agent_config: AgentConfig,
    config: Config,
    orchestrator: Arc<Orchestrator>,
    register: RateLimitRegister,
    reflections: Option<Arc<dyn ReflectionClient>>,
    http: reqwest::Client,
    shutdown: Arc<AtomicBool>,

    worker: Option<WorkerProcess>,
    current_session: Option<SessionStats>,
    current_task: Option<Task>,
    task_started_at: Option<DateTime<Utc>>,
    /// Task to retry on the runner's own slot (rate-limit fallback,
    /// claim recovery). Takes priority over a fresh claim.
    retry_task: Option<Task>,

    consecutive_failures: u32,
    total_sessions: u64,
    tokens_today: i64,
    budget_day: NaiveDate,
    rate_limited_until: Option<DateTime<Utc>>,
    last_restart: Option<DateTime<Utc>>,
}

impl AgentRunner {
    pub fn new(
        agent_id: impl Into<String>,
        config: Config,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        let agent_id = agent_id.into();
        let agent_config = config.agents.get(&agent_id).cloned().unwrap_or_else(|| {
            tracing::warn!(agent_id = %agent_id, "No agent config found, using defaults");
            AgentConfig {
                name: agent_id.clone(),
                prompt_file: format!(".foreman/prompts/{agent_id}.md"),
                ..Default::default()
            }
        });
        let register = RateLimitRegister::in_control_dir(Path::new(&config.watcher.control_dir));

        Self {
            agent_id,
            agent_config,
            config,
            orchestrator,
            register,
            reflections: None,
            http: reqwest::Client::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
            current_session: None,
            current_task: None,
            task_started_at: None,
            retry_task: None,
            consecutive_failures: 0,
            total_sessions: 0,
            tokens_today: 0,
            budget_day: Utc::now().date_naive(),
            rate_limited_until: None,
            last_restart: None,
        }
    }

    pub fn with_reflections(mut self, reflections: Arc<dyn ReflectionClient>) -> Self {
        self.reflections = Some(reflections);
        self
    }

    /// Flag polled by every sleep; setting it drains the loop.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn control_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.watcher.control_dir)
    }

    fn task_types(&self) -> Option<Vec<String>> {
        if let Some(types) = &self.agent_config.task_types {
            return Some(types.clone());
        }
        agent_task_types(&self.agent_id)
            .map(|types| types.into_iter().map(str::to_owned).collect())
    }

    /// Main supervision loop. Returns on shutdown.
    pub async fn run(&mut self) {
        tracing::info!(agent_id = %self.agent_id, "Starting agent runner");
        let _ = self
            .orchestrator
            .update_agent_status(&self.agent_id, AgentState::Idle, None)
            .await;

        self.recover_claimed_tasks().await;

        while !self.shutdown.load(Ordering::SeqCst) {
            if let Err(e) = self.iteration().await {
                tracing::error!(agent_id = %self.agent_id, "Runner iteration failed: {e}");
                self.sleep(Duration::from_secs(10)).await;
            }
        }

        // Drain: stop any live worker and persist its session end.
        if let Some(worker) = self.worker.as_mut() {
            if worker.is_alive() {
                let exit_code = worker.stop(STOP_GRACE).await;
                if let Err(e) = self.handle_session_end(exit_code).await {
                    tracing::warn!("Failed to finalise session on shutdown: {e}");
                }
            }
        }
        let _ = self
            .orchestrator
            .update_agent_status(&self.agent_id, AgentState::Stopped, None)
            .await;
        tracing::info!(agent_id = %self.agent_id, "Agent runner stopped");
    }

    async fn iteration(&mut self) -> DomainResult<()> {
        // Gating: process-external enable flag.
        if !is_agent_enabled(&self.control_dir(), &self.agent_id) {
            self.orchestrator
                .update_agent_status(&self.agent_id, AgentState::Disabled, None)
                .await?;
            self.sleep(Duration::from_secs(10)).await;
            return Ok(());
        }

        // Fleet-wide rate-limit register.
        if let Some(flag) = self.register.get() {
            let provider = self.select_provider();
            if provider == flag.provider {
                self.wait_for_rate_limit_reset(flag.reset_time).await?;
                return Ok(());
            }
            tracing::info!(
                limited = %flag.provider,
                fallback = %provider,
                "Provider rate limited, continuing on fallback"
            );
        }

        // Daily token budget.
        self.roll_budget_day();
        if !self.within_token_budget() {
            tracing::warn!(agent_id = %self.agent_id, "Daily token budget exceeded");
            self.orchestrator
                .update_agent_status(&self.agent_id, AgentState::BudgetExceeded, None)
                .await?;
            self.sleep(Duration::from_secs(3600)).await;
            return Ok(());
        }

        self.drain_mail().await?;

        let worker_alive = self.worker.as_mut().is_some_and(WorkerProcess::is_alive);
        if !worker_alive {
            if self.worker.is_some() {
                let exit_code = self
                    .worker
                    .as_mut()
                    .and_then(WorkerProcess::exit_code)
                    .unwrap_or(0);
                self.handle_session_end(exit_code).await?;
            }

            // Fleet concurrency cap, counted from peer status files.
            let working = count_working_peers(&self.control_dir(), &self.agent_id);
            if working >= self.config.orchestrator.max_concurrent_agents {
                tracing::info!(
                    working,
                    cap = self.config.orchestrator.max_concurrent_agents,
                    "Concurrency cap reached, waiting"
                );
                self.orchestrator
                    .update_agent_status(&self.agent_id, AgentState::Waiting, None)
                    .await?;
                self.sleep(Duration::from_secs(30)).await;
                return Ok(());
            }

            let delay = self.restart_delay();
            if delay > Duration::from_secs(self.config.watcher.restart_delay) {
                tracing::info!(
                    delay_secs = delay.as_secs(),
                    failures = self.consecutive_failures,
                    "Backing off before restart"
                );
                self.sleep(delay).await;
            }
            self.sleep(self.session_throttle()).await;
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }

            let task = match self.retry_task.take() {
                Some(task) => Some(task),
                None => {
                    self.orchestrator
                        .claim_task(&self.agent_id, None, self.task_types().as_deref())
                        .await?
                }
            };

            if !self.start_session(task).await {
                let delay = self.restart_delay();
                self.sleep(delay).await;
            }
            return Ok(());
        }

        // Session duration ceiling.
        if self.session_over_duration() {
            tracing::info!(agent_id = %self.agent_id, "Session exceeded max duration, stopping worker");
            if let Some(worker) = self.worker.as_mut() {
                let exit_code = worker.stop(STOP_GRACE).await;
                self.handle_session_end(exit_code).await?;
            }
            return Ok(());
        }

        self.write_status_file();
        self.sleep(Duration::from_secs(self.config.watcher.health_check_interval)).await;
        Ok(())
    }

    /// Start a worker session, optionally bound to a task.
    async fn start_session(&mut self, task: Option<Task>) -> bool {
        // Always reset so a failed spawn can never complete a stale task.
        self.current_task = None;
        self.task_started_at = None;

        let task_context = task.as_ref().map(Self::build_task_context);
        let provider = self.select_provider();
        let provider_config = self.provider_config(&provider);
        let model = self.resolve_model(&provider);

        let output_path = match (&task, &self.config.watcher.output_store_dir) {
            (Some(task), Some(dir)) => Some(Path::new(dir).join(format!("{}.log", task.id))),
            _ => None,
        };

        let mut env = vec![];
        if provider == "codex" {
            if let Ok(key) =
                std::env::var("OPENAI_API_KEY").or_else(|_| std::env::var("CODEX_API_KEY"))
            {
                env.push(("OPENAI_API_KEY".to_string(), key));
            }
        }

        let spawn = WorkerSpawn {
            agent_id: self.agent_id.clone(),
            provider: provider.clone(),
            provider_config,
            model,
            prompt_path: PathBuf::from(&self.agent_config.prompt_file),
            task_context,
            working_dir: PathBuf::from(&self.config.watcher.working_dir),
            output_path,
            buffer_chars: self.config.watcher.output_stream_buffer_chars,
            env,
        };

        match WorkerProcess::spawn(spawn) {
            Ok(worker) => {
                self.current_session = Some(SessionStats {
                    session_id: worker.session_id.clone(),
                    started_at: Utc::now(),
                    provider,
                });
                self.total_sessions += 1;
                self.last_restart = Some(Utc::now());
                self.consecutive_failures = 0;

                let task_id = task.as_ref().map(|t| t.id.clone());
                if let Some(task) = task {
                    let _ = self
                        .orchestrator
                        .mark_in_progress(&task.id, &self.agent_id)
                        .await;
                    self.task_started_at = Some(Utc::now());
                    self.current_task = Some(task);
                }
                let _ = self
                    .orchestrator
                    .update_agent_status(&self.agent_id, AgentState::Running, task_id.as_deref())
                    .await;

                self.worker = Some(worker);
                self.write_status_file();
                true
            }
            Err(e) => {
                tracing::error!(agent_id = %self.agent_id, "Failed to start session: {e}");
                self.consecutive_failures += 1;
                false
            }
        }
    }

    /// Finalise an exited worker: rate-limit scan, token accounting, task
    /// completion, outcome record, reflection.
    async fn handle_session_end(&mut self, exit_code: i32) -> DomainResult<()> {
        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };
        let provider = worker.provider.clone();
        let output_path = worker.output_path.clone();
        let (output, buffer_truncated) = worker.finish().await;

        let rate_limit_reset = if exit_code == 0 {
            None
        } else {
            detect_rate_limit_reset(&output, Utc::now())
        };
        if let Some(reset) = rate_limit_reset {
            if let Err(e) = self.register.set(&provider, reset, &self.agent_id) {
                tracing::error!("Failed to write rate-limit register: {e}");
            }
        }

        if let Some(session) = self.current_session.take() {
            let totals = parse_token_usage(&output);
            if totals.total() > 0 {
                self.tokens_today += totals.total();
                let usage = TokenUsage {
                    agent_id: self.agent_id.clone(),
                    session_id: session.session_id.clone(),
                    input_tokens: totals.input,
                    output_tokens: totals.output,
                    total_tokens: totals.total(),
                    recorded_at: Utc::now(),
                };
                if let Err(e) = self.orchestrator.record_token_usage(&usage).await {
                    tracing::warn!("Failed to record token usage: {e}");
                }
            }
            tracing::info!(
                session_id = %session.session_id,
                exit_code,
                tokens = totals.total(),
                duration_secs = (Utc::now() - session.started_at).num_seconds(),
                "Session ended"
            );
        }

        if exit_code != 0 && rate_limit_reset.is_none() {
            self.consecutive_failures += 1;
            tracing::warn!(exit_code, "Session exited with failure");
        }

        // Fallback keeps the task on the runner's retry slot instead of the
        // queue: the same task restarts immediately on the other provider.
        let retry_task = rate_limit_reset.is_some() && self.should_fallback(&provider);
        if let Some(reset) = rate_limit_reset {
            if !retry_task {
                self.wait_for_rate_limit_reset(reset).await?;
            }
        }

        let task = self.current_task.take();
        let task_started = self.task_started_at.take();
        if let Some(task) = task {
            if retry_task {
                tracing::info!(task_id = %task.id, "Requeuing task on retry slot for provider fallback");
                self.retry_task = Some(task);
            } else {
                self.finish_task(&task, exit_code, &output, buffer_truncated, output_path, task_started)
                    .await;
            }
        }

        self.orchestrator
            .update_agent_status(&self.agent_id, AgentState::Idle, None)
            .await?;
        Ok(())
    }

    async fn finish_task(
        &mut self,
        task: &Task,
        exit_code: i32,
        output: &str,
        buffer_truncated: bool,
        output_path: Option<PathBuf>,
        task_started: Option<DateTime<Utc>>,
    ) {
        let success = exit_code == 0;
        let summary = extract_summary(output, self.config.watcher.output_summary_chars);
        let excerpt = output_excerpt(output, self.config.watcher.output_excerpt_chars);
        let truncated =
            buffer_truncated || excerpt.as_ref().is_some_and(|e| e.len() < output.len());

        let mut result = json!({
            "exit_code": exit_code,
            "summary": summary,
            "output_excerpt": excerpt,
            "output_truncated": truncated,
            "output_chars": output.len(),
        });
        if let Some(path) = &output_path {
            result["output_path"] = json!(path.display().to_string());
        }
        if let Some(url) = self.mirror_output(&task.id, output).await {
            result["output_url"] = json!(url);
        }

        let error = (!success).then(|| format!("Session exited with code {exit_code}"));
        match self
            .orchestrator
            .complete_task(&task.id, &self.agent_id, Some(&result), error.as_deref())
            .await
        {
            Ok(true) if success => {
                let _ = self.orchestrator.increment_completed(&self.agent_id).await;
            }
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(task_id = %task.id, "Completion skipped: task no longer ours");
            }
            Err(e) => tracing::warn!(task_id = %task.id, "Failed to complete task: {e}"),
        }

        let mut outcome = TaskOutcome::new(
            &task.id,
            &self.agent_id,
            &task.task_type,
            if success { OutcomeKind::Success } else { OutcomeKind::Failure },
        );
        outcome.repo_id = task.repo_id.clone();
        outcome.duration_seconds = task_started.map(|t| (Utc::now() - t).num_seconds());
        outcome.error_summary = (!success).then(|| format!("Exit code {exit_code}"));
        outcome.context_summary = task
            .payload
            .get("instruction")
            .and_then(|i| i.as_str())
            .map(|i| i.chars().take(200).collect());
        if let Err(e) = self.orchestrator.record_outcome(&outcome).await {
            tracing::warn!("Failed to record outcome: {e}");
        }

        if let Some(reflections) = &self.reflections {
            let tail: String = output.chars().rev().take(2000).collect::<Vec<_>>().into_iter().rev().collect();
            reflections
                .record_reflection(&self.agent_id, task, success, &tail)
                .await;
        }
    }

    /// Best-effort mirror of the full log to object storage. The bucket is
    /// addressed as an HTTP endpoint; failures only log.
    async fn mirror_output(&self, task_id: &str, output: &str) -> Option<String> {
        let bucket = self.config.watcher.output_store_s3_bucket.as_ref()?;
        if output.is_empty() {
            return None;
        }
        let prefix = self.config.watcher.output_store_s3_prefix.trim_matches('/');
        let key = format!("{prefix}/{task_id}-{}.log", Uuid::new_v4().simple());
        let url = format!("{}/{key}", bucket.trim_end_matches('/'));

        match self
            .http
            .put(&url)
            .header("content-type", "text/plain")
            .body(output.to_string())
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Some(url),
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Log mirror rejected upload");
                None
            }
            Err(e) => {
                tracing::warn!("Log mirror upload failed: {e}");
                None
            }
        }
    }

    /// Pause until the provider resets, staying responsive to shutdown.
    async fn wait_for_rate_limit_reset(&mut self, reset: DateTime<Utc>) -> DomainResult<()> {
        self.rate_limited_until = Some(reset);
        self.orchestrator
            .update_agent_status(&self.agent_id, AgentState::RateLimited, None)
            .await?;
        tracing::info!(reset = %reset.to_rfc3339(), "Rate limited, pausing");

        while Utc::now() < reset && !self.shutdown.load(Ordering::SeqCst) {
            self.write_status_file();
            let remaining = (reset - Utc::now()).num_seconds().max(0);
            #[allow(clippy::cast_sign_loss)]
            let step = Duration::from_secs((remaining as u64).min(60).max(1));
            self.sleep(step).await;
        }

        self.rate_limited_until = None;
        self.register.clear();
        self.orchestrator
            .update_agent_status(&self.agent_id, AgentState::Idle, None)
            .await?;
        tracing::info!("Rate limit reset, resuming");
        Ok(())
    }

    /// Drain inter-agent mail; handoffs become tasks.
    async fn drain_mail(&self) -> DomainResult<()> {
        let messages = self.orchestrator.unread_messages(&self.agent_id).await?;
        for message in messages {
            tracing::info!(
                from = %message.from_agent,
                kind = message.message_type.as_str(),
                "Received agent message"
            );
            if message.message_type == MessageType::Handoff {
                let task_type = message
                    .payload
                    .get("task_type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("directive")
                    .to_string();
                let payload = message
                    .payload
                    .get("task_payload")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let priority = message
                    .payload
                    .get("priority")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(5);
                let _ = self
                    .orchestrator
                    .create_task(
                        NewTask::new(task_type, payload)
                            .with_priority(priority)
                            .with_created_by(message.from_agent.clone()),
                    )
                    .await?;
            }
            self.orchestrator
                .mark_message_read(&message.id, &self.agent_id)
                .await?;
        }
        Ok(())
    }

    /// Pick up tasks still bound to this agent after a restart. The first
    /// goes on the retry slot; extras only warn.
    async fn recover_claimed_tasks(&mut self) {
        if self.retry_task.is_some() || self.current_task.is_some() {
            return;
        }
        match self.orchestrator.get_assigned_tasks(&self.agent_id, 5).await {
            Ok(tasks) => {
                if let Some(first) = tasks.first() {
                    tracing::info!(task_id = %first.id, task_type = %first.task_type, "Recovered assigned task after restart");
                    self.retry_task = Some(first.clone());
                }
                if tasks.len() > 1 {
                    let extras: Vec<_> = tasks[1..].iter().map(|t| t.id.clone()).collect();
                    tracing::warn!(agent_id = %self.agent_id, ?extras, "Multiple assigned tasks detected");
                }
            }
            Err(e) => tracing::warn!("Failed to recover claimed tasks: {e}"),
        }
    }

    fn build_task_context(task: &Task) -> String {
        format!(
            "You have been assigned a task:\n\n\
             **Task ID**: {}\n\
             **Type**: {}\n\
             **Priority**: {}/10\n\
             **Created by**: {}\n\n\
             **Payload**:\n```json\n{}\n```\n\n\
             Work the task to completion. Your process output is captured and\n\
             attached to the task when you exit.",
            task.id,
            task.task_type,
            task.priority,
            task.created_by.as_deref().unwrap_or("system"),
            serde_json::to_string_pretty(&task.payload).unwrap_or_else(|_| "{}".to_string()),
        )
    }

    // ==================== PROVIDER SELECTION ====================

    fn select_provider(&self) -> String {
        if let Ok(value) = std::env::var(&self.config.llm.manual_override_env) {
            let value = value.trim().to_lowercase();
            if !value.is_empty() {
                return value;
            }
        }
        if let Some(provider) = &self.agent_config.provider {
            return provider.trim().to_lowercase();
        }

        let default = self.config.llm.default_provider.clone();
        if let Some(flag) = self.register.get() {
            if self.should_fallback(&flag.provider) {
                if let Some(fallback) = &self.config.llm.fallback_provider {
                    return fallback.clone();
                }
            }
        }
        default
    }

    /// Fallback applies only to the default provider, and only when enabled
    /// with a fallback configured.
    fn should_fallback(&self, limited_provider: &str) -> bool {
        self.config.llm.auto_fallback_on_rate_limit
            && self.config.llm.fallback_provider.is_some()
            && limited_provider == self.config.llm.default_provider
    }

    fn provider_config(&self, provider: &str) -> ProviderConfig {
        self.config
            .llm
            .providers
            .get(provider)
            .cloned()
            .unwrap_or_else(|| ProviderConfig {
                command: provider.to_string(),
                ..Default::default()
            })
    }

    /// Map the agent's model name through the provider's model map. An
    /// empty map means the provider takes no model flag at all.
    fn resolve_model(&self, provider: &str) -> Option<String> {
        let model = self.agent_config.model.clone();
        let provider_config = self.config.llm.providers.get(provider);
        if let Some(map) = provider_config.and_then(|c| c.model_map.as_ref()) {
            if map.is_empty() {
                return None;
            }
            if let Some(model) = &model {
                if let Some(mapped) = map.get(model) {
                    return Some(mapped.clone());
                }
            }
        }
        model
    }

    // ==================== BUDGET / TIMING ====================

    fn roll_budget_day(&mut self) {
        let today = Utc::now().date_naive();
        if today > self.budget_day {
            tracing::info!("Resetting daily token counter");
            self.tokens_today = 0;
            self.budget_day = today;
        }
    }

    fn within_token_budget(&self) -> bool {
        let budget = self.config.tokens.daily_budget;
        if budget == 0 {
            return true;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.tokens_today as f64 / budget as f64;
        if ratio >= 1.0 {
            return false;
        }
        if ratio >= self.config.tokens.warning_threshold {
            tracing::warn!(
                "Token usage at {:.1}% of daily budget",
                ratio * 100.0
            );
        }
        true
    }

    /// Exponential back-off keyed on consecutive failures, clamped.
    fn restart_delay(&self) -> Duration {
        let base = self.config.watcher.restart_delay;
        if self.consecutive_failures == 0 {
            return Duration::from_secs(base);
        }
        let factor = 2u64.saturating_pow(self.consecutive_failures);
        Duration::from_secs(base.saturating_mul(factor).min(MAX_RESTART_DELAY_SECS))
    }

    /// Randomised delay before each session so runners do not hit the
    /// provider in lockstep.
    fn session_throttle(&self) -> Duration {
        let min = self.config.watcher.session_delay_min;
        let max = self.config.watcher.session_delay_max.max(min);
        let secs = rand::thread_rng().gen_range(min..=max);
        Duration::from_secs(secs)
    }

    fn session_over_duration(&self) -> bool {
        let Some(session) = &self.current_session else {
            return false;
        };
        let elapsed = (Utc::now() - session.started_at).num_seconds();
        elapsed > i64::try_from(self.config.watcher.max_session_duration).unwrap_or(i64::MAX)
    }

    /// Shutdown-responsive sleep in one-second steps.
    async fn sleep(&self, duration: Duration) {
        let mut remaining = duration;
        while remaining > Duration::ZERO && !self.shutdown.load(Ordering::SeqCst) {
            let step = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
    }

    // ==================== STATUS FILE ====================

    fn write_status_file(&self) {
        let status = self.snapshot();
        if let Err(e) = write_status(&self.control_dir(), &status) {
            tracing::error!("Failed to write status file: {e}");
        }
    }

    fn snapshot(&self) -> RunnerStatus {
        let now = Utc::now();
        RunnerStatus {
            agent_id: self.agent_id.clone(),
            agent_name: if self.agent_config.name.is_empty() {
                self.agent_id.clone()
            } else {
                self.agent_config.name.clone()
            },
            is_running: true,
            current_session: self.current_session.as_ref().map(|s| SessionSnapshot {
                id: Some(s.session_id.clone()),
                start_time: Some(s.started_at.to_rfc3339()),
                provider: Some(s.provider.clone()),
                #[allow(clippy::cast_precision_loss)]
                duration_seconds: (now - s.started_at).num_seconds() as f64,
            }),
            current_task: self.current_task.as_ref().map(|t| TaskSnapshot {
                id: Some(t.id.clone()),
                task_type: Some(t.task_type.clone()),
                priority: Some(t.priority),
            }),
            total_sessions: self.total_sessions,
            total_tokens_today: self.tokens_today,
            consecutive_failures: self.consecutive_failures,
            last_restart: self.last_restart.map(|t| t.to_rfc3339()),
            rate_limit: RateLimitSnapshot {
                limited: self.rate_limited_until.is_some(),
                reset_time: self.rate_limited_until.map(|t| t.to_rfc3339()),
                wait_seconds: self
                    .rate_limited_until
                    .map(|t| (t - now).num_seconds().max(0) as f64),
            },
            token_budget: BudgetSnapshot {
                daily_limit: self.config.tokens.daily_budget,
                used: self.tokens_today,
            },
            extra: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::ports::LogNotifier;
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn runner_with(config: Config) -> (AgentRunner, Arc<Orchestrator>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let orchestrator = Arc::new(Orchestrator::sqlite(pool, Arc::new(LogNotifier), 7200));
        (
            AgentRunner::new("builder", config, orchestrator.clone()),
            orchestrator,
        )
    }

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.watcher.control_dir = dir.path().join("control").display().to_string();
        config
    }

    #[tokio::test]
    async fn test_restart_delay_backoff_clamped() {
        let dir = TempDir::new().unwrap();
        let (mut runner, _) = runner_with(config_in(&dir)).await;

        assert_eq!(runner.restart_delay(), Duration::from_secs(10));
        runner.consecutive_failures = 1;
        assert_eq!(runner.restart_delay(), Duration::from_secs(20));
        runner.consecutive_failures = 3;
        assert_eq!(runner.restart_delay(), Duration::from_secs(80));
        runner.consecutive_failures = 10;
        assert_eq!(runner.restart_delay(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_session_throttle_within_bounds() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.watcher.session_delay_min = 3;
        config.watcher.session_delay_max = 7;
        let (runner, _) = runner_with(config).await;

        for _ in 0..50 {
            let throttle = runner.session_throttle();
            assert!(throttle >= Duration::from_secs(3) && throttle <= Duration::from_secs(7));
        }
    }

    #[tokio::test]
    async fn test_budget_unlimited_when_zero() {
        let dir = TempDir::new().unwrap();
        let (mut runner, _) = runner_with(config_in(&dir)).await;
        runner.tokens_today = i64::MAX / 2;
        assert!(runner.within_token_budget());
    }

    #[tokio::test]
    async fn test_budget_exceeded() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.tokens.daily_budget = 1000;
        let (mut runner, _) = runner_with(config).await;

        runner.tokens_today = 999;
        assert!(runner.within_token_budget());
        runner.tokens_today = 1000;
        assert!(!runner.within_token_budget());
    }

    #[tokio::test]
    async fn test_budget_day_roll_resets_counter() {
        let dir = TempDir::new().unwrap();
        let (mut runner, _) = runner_with(config_in(&dir)).await;
        runner.tokens_today = 5000;
        runner.budget_day = Utc::now().date_naive().pred_opt().unwrap();
        runner.roll_budget_day();
        assert_eq!(runner.tokens_today, 0);
    }

    #[tokio::test]
    async fn test_should_fallback_only_for_default_provider() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.llm.auto_fallback_on_rate_limit = true;
        config.llm.fallback_provider = Some("codex".to_string());
        let (runner, _) = runner_with(config).await;

        assert!(runner.should_fallback("claude"));
        assert!(!runner.should_fallback("codex"));
    }

    #[tokio::test]
    async fn test_select_provider_fallback_when_register_set() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.llm.auto_fallback_on_rate_limit = true;
        config.llm.fallback_provider = Some("codex".to_string());
        let (runner, _) = runner_with(config).await;

        assert_eq!(runner.select_provider(), "claude");

        runner
            .register
            .set("claude", Utc::now() + chrono::Duration::hours(1), "reviewer")
            .unwrap();
        assert_eq!(runner.select_provider(), "codex");
    }

    #[tokio::test]
    async fn test_resolve_model_through_map() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        let mut model_map = HashMap::new();
        model_map.insert("smart".to_string(), "provider-smart-1".to_string());
        config.llm.providers.insert(
            "claude".to_string(),
            ProviderConfig {
                model_map: Some(model_map),
                ..Default::default()
            },
        );
        config.llm.providers.insert(
            "codex".to_string(),
            ProviderConfig {
                model_map: Some(HashMap::new()),
                ..Default::default()
            },
        );
        config.agents.insert(
            "builder".to_string(),
            AgentConfig {
                name: "Builder".to_string(),
                prompt_file: "prompt.md".to_string(),
                model: Some("smart".to_string()),
                ..Default::default()
            },
        );
        let (runner, _) = runner_with(config).await;

        assert_eq!(runner.resolve_model("claude").as_deref(), Some("provider-smart-1"));
        // Empty model map suppresses the model flag entirely.
        assert_eq!(runner.resolve_model("codex"), None);
        // Unmapped provider passes the agent's model straight through.
        assert_eq!(runner.resolve_model("other").as_deref(), Some("smart"));
    }

    #[tokio::test]
    async fn test_mail_handoff_creates_task() {
        let dir = TempDir::new().unwrap();
        let (runner, orchestrator) = runner_with(config_in(&dir)).await;

        let message = crate::domain::models::AgentMessage::new(
            "pm",
            "builder",
            MessageType::Handoff,
            json!({"task_type": "implement_feature", "task_payload": {"title": "Ship it"}, "priority": 7}),
        );
        orchestrator.send_message(&message).await.unwrap();

        runner.drain_mail().await.unwrap();

        let tasks = orchestrator
            .list_tasks(crate::domain::ports::TaskFilter::default())
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_type, "implement_feature");
        assert_eq!(tasks[0].priority, 7);
        assert_eq!(tasks[0].created_by.as_deref(), Some("pm"));

        // Mail is consumed.
        assert!(orchestrator.unread_messages("builder").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_claimed_tasks_fills_retry_slot() {
        let dir = TempDir::new().unwrap();
        let (mut runner, orchestrator) = runner_with(config_in(&dir)).await;

        orchestrator
            .create_task(NewTask::new("implement_fix", json!({"title": "x"})))
            .await
            .unwrap();
        let types = vec!["implement_fix".to_string()];
        let claimed = orchestrator
            .claim_task("builder", None, Some(&types))
            .await
            .unwrap()
            .unwrap();

        runner.recover_claimed_tasks().await;
        assert_eq!(runner.retry_task.as_ref().map(|t| t.id.clone()), Some(claimed.id));
    }

    #[tokio::test]
    async fn test_snapshot_marks_rate_limit() {
        let dir = TempDir::new().unwrap();
        let (mut runner, _) = runner_with(config_in(&dir)).await;
        runner.rate_limited_until = Some(Utc::now() + chrono::Duration::minutes(10));

        let snapshot = runner.snapshot();
        assert!(snapshot.rate_limit.limited);
        assert!(snapshot.rate_limit.wait_seconds.unwrap() > 0.0);
        assert!(!snapshot.is_working());
    }
}
