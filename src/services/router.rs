//! Webhook-to-task routing.
//!
//! Verifies the shared-secret header, evaluates routing rules (single or
//! parallel fan-out) with a deliberately small condition DSL, de-duplicates
//! issue events, and submits tasks through the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::domain::errors::DomainError;
use crate::domain::models::{AutonomyMode, Repo, RouteConfig, RouteTarget};
use crate::services::orchestrator::{NewTask, Orchestrator};

/// Reserved payload key carrying resolved repo metadata for rule evaluation.
pub const REPO_META_KEY: &str = "_foreman_repo";

/// A parsed inbound forge event.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: String,
    pub action: Option<String>,
    pub repo_id: String,
    pub autonomy_mode: AutonomyMode,
    /// Labels normalised once at the boundary: lowercased titles.
    pub labels: Vec<String>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl WebhookEvent {
    /// Routing key: "event_type:action", or the bare event type.
    pub fn key(&self) -> String {
        match &self.action {
            Some(action) => format!("{}:{action}", self.event_type),
            None => self.event_type.clone(),
        }
    }
}

/// Router response, mirrored onto the HTTP body.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_ids: Option<Vec<String>>,
}

impl WebhookResponse {
    fn ignored(message: impl Into<String>) -> Self {
        Self { status: "ignored", message: message.into(), task_id: None, task_ids: None }
    }
}

/// Errors surfaced to the transport with distinct status codes.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Unknown repo: {0}")]
    UnknownRepo(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error(transparent)]
    Internal(#[from] DomainError),
}

pub struct WebhookRouter {
    orchestrator: Arc<Orchestrator>,
    triggers: HashMap<String, Option<RouteConfig>>,
    /// Env-wide fallback secret when a repo has none configured.
    fallback_secret: Option<String>,
}

impl WebhookRouter {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        triggers: HashMap<String, Option<RouteConfig>>,
        fallback_secret: Option<String>,
    ) -> Self {
        Self { orchestrator, triggers, fallback_secret }
    }

    /// Full webhook protocol: resolve repo, verify token, parse, route.
    pub async fn handle(
        &self,
        provider: &str,
        event_header: Option<&str>,
        token_header: Option<&str>,
        mut body: serde_json::Value,
    ) -> Result<WebhookResponse, WebhookError> {
        let project_ref = project_ref(&body)
            .ok_or_else(|| WebhookError::UnknownRepo("missing project metadata".to_string()))?;

        let repo = self
            .orchestrator
            .get_repo_by_project_ref(&project_ref)
            .await?
            .ok_or_else(|| WebhookError::UnknownRepo(project_ref.clone()))?;

        self.verify_token(&repo, token_header)?;

        body[REPO_META_KEY] = serde_json::json!({
            "id": repo.id,
            "autonomy_mode": repo.autonomy_mode.as_str(),
        });

        let event = parse_event(event_header.unwrap_or(""), &repo, body);
        tracing::info!(
            provider,
            event_type = %event.event_type,
            action = event.action.as_deref().unwrap_or("-"),
            repo_id = %event.repo_id,
            "Received webhook"
        );

        self.route_event(&event, provider).await.map_err(WebhookError::Internal)
    }

    /// Token verification: missing configured secret or missing header both
    /// reject; the comparison itself is constant-time.
    fn verify_token(&self, repo: &Repo, token_header: Option<&str>) -> Result<(), WebhookError> {
        let secret = repo
            .webhook_secret()
            .map(str::to_owned)
            .or_else(|| self.fallback_secret.clone());
        let Some(secret) = secret else {
            tracing::warn!(repo_id = %repo.id, "No webhook secret configured, rejecting");
            return Err(WebhookError::Unauthorized("no webhook secret configured"));
        };
        let Some(token) = token_header else {
            return Err(WebhookError::Unauthorized("missing token header"));
        };
        if token.as_bytes().ct_eq(secret.as_bytes()).into() {
            Ok(())
        } else {
            tracing::warn!(repo_id = %repo.id, "Invalid webhook token");
            Err(WebhookError::Unauthorized("invalid token"))
        }
    }

    /// Look up the route for an event and create the task(s).
    pub async fn route_event(
        &self,
        event: &WebhookEvent,
        provider: &str,
    ) -> Result<WebhookResponse, DomainError> {
        let key = event.key();
        // Fall back to the bare event type for catch-all routes. An explicit
        // "event:action": null entry still suppresses that action.
        let routing = match self.triggers.get(&key) {
            Some(route) => route.as_ref(),
            None => match self.triggers.get(&event.event_type) {
                Some(route) => route.as_ref(),
                None => {
                    tracing::info!(key = %key, "No routing for event");
                    return Ok(WebhookResponse::ignored(format!("Event {key} not routed")));
                }
            },
        };
        let Some(routing) = routing else {
            return Ok(WebhookResponse::ignored(format!("Event {key} ignored")));
        };

        // Issue events are de-duplicated against the processed-event log.
        let issue_dedup = if event.event_type == "issue" {
            let issue_id = event
                .payload
                .get("object_attributes")
                .and_then(|a| a.get("iid").or_else(|| a.get("id")))
                .and_then(serde_json::Value::as_i64)
                .map(|id| id.to_string());
            let action = event.action.clone().unwrap_or_default();
            if let Some(issue_id) = &issue_id {
                if self
                    .orchestrator
                    .is_event_processed(issue_id, &event.repo_id, &action)
                    .await?
                {
                    tracing::info!(issue_id = %issue_id, "Duplicate issue event skipped");
                    return Ok(WebhookResponse::ignored("duplicate issue event"));
                }
            }
            issue_id.map(|id| (id, action))
        } else {
            None
        };

        let task_payload = build_task_payload(event);
        let priority = calculate_priority(event);
        let created_by = format!("{provider}_webhook");

        let created = match routing {
            RouteConfig::Single(target) => {
                let condition_ok = match target.condition.as_deref() {
                    Some(condition) => evaluate_condition(condition, event),
                    None => true,
                };
                if !condition_ok {
                    tracing::info!(key = %key, "Condition not met");
                    return Ok(WebhookResponse::ignored(format!("Condition not met for {key}")));
                }
                self.create_route_task(target, &task_payload, priority, &created_by, event)
                    .await?
                    .into_iter()
                    .collect::<Vec<_>>()
            }
            RouteConfig::Parallel { parallel } => {
                let mut created = Vec::new();
                for target in parallel {
                    let condition_ok = match target.condition.as_deref() {
                        Some(condition) => evaluate_condition(condition, event),
                        None => true,
                    };
                    if !condition_ok {
                        tracing::info!(task_type = %target.task_type, "Skipping parallel target: condition not met");
                        continue;
                    }
                    if let Some(task_id) = self
                        .create_route_task(target, &task_payload, priority, &created_by, event)
                        .await?
                    {
                        created.push(task_id);
                    }
                }
                created
            }
        };

        if created.is_empty() {
            return Ok(WebhookResponse::ignored(format!("Event {key} produced no tasks")));
        }

        if let Some((issue_id, action)) = issue_dedup {
            self.orchestrator
                .mark_event_processed(&issue_id, &event.repo_id, &action)
                .await?;
        }

        Ok(match created.as_slice() {
            [single] => WebhookResponse {
                status: "accepted",
                message: "Task created".to_string(),
                task_id: Some(single.clone()),
                task_ids: None,
            },
            many => WebhookResponse {
                status: "accepted",
                message: format!("Tasks created: {}", many.len()),
                task_id: None,
                task_ids: Some(many.to_vec()),
            },
        })
    }

    async fn create_route_task(
        &self,
        target: &RouteTarget,
        task_payload: &serde_json::Value,
        priority: i64,
        created_by: &str,
        event: &WebhookEvent,
    ) -> Result<Option<String>, DomainError> {
        let task = self
            .orchestrator
            .create_task(
                NewTask::new(target.task_type.clone(), task_payload.clone())
                    .with_repo(event.repo_id.clone())
                    .with_priority(priority)
                    .with_created_by(created_by.to_string()),
            )
            .await?;

        if let Some(task) = &task {
            tracing::info!(
                task_id = %task.id,
                task_type = %target.task_type,
                agent = %target.agent,
                "Created task from webhook"
            );
        }
        Ok(task.map(|t| t.id))
    }
}

/// Extract the forge project reference from the body.
fn project_ref(body: &serde_json::Value) -> Option<String> {
    let project = body.get("project")?;
    project
        .get("path_with_namespace")
        .and_then(|p| p.as_str())
        .map(str::to_owned)
        .or_else(|| {
            let id = project.get("id")?;
            id.as_i64()
                .map(|id| id.to_string())
                .or_else(|| id.as_str().map(str::to_owned))
        })
}

/// Parse the raw body into a routed event. Labels are normalised here, once,
/// for both the condition DSL and the priority boost.
pub fn parse_event(event_header: &str, repo: &Repo, payload: serde_json::Value) -> WebhookEvent {
    let event_type = event_header.to_lowercase().replace(" hook", "");
    let attrs = payload.get("object_attributes");

    let action = match event_type.as_str() {
        "issue" | "merge_request" => attrs
            .and_then(|a| a.get("action"))
            .and_then(|a| a.as_str())
            .map(str::to_owned),
        "note" => attrs
            .and_then(|a| a.get("noteable_type"))
            .and_then(|a| a.as_str())
            .map(str::to_lowercase),
        "pipeline" => attrs
            .and_then(|a| a.get("status"))
            .and_then(|a| a.as_str())
            .map(str::to_owned),
        _ => None,
    };

    let labels = normalise_labels(&payload);

    WebhookEvent {
        event_type,
        action,
        repo_id: repo.id.clone(),
        autonomy_mode: repo.autonomy_mode,
        labels,
        payload,
        timestamp: Utc::now(),
    }
}

/// The payload carries labels in one of two shapes: objects with a title
/// at the top level, or bare strings under object_attributes.
fn normalise_labels(payload: &serde_json::Value) -> Vec<String> {
    if let Some(labels) = payload.get("labels").and_then(|l| l.as_array()) {
        return labels
            .iter()
            .filter_map(|l| l.get("title").and_then(|t| t.as_str()))
            .map(str::to_lowercase)
            .collect();
    }
    payload
        .get("object_attributes")
        .and_then(|a| a.get("labels"))
        .and_then(|l| l.as_array())
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| {
                    l.as_str()
                        .map(str::to_lowercase)
                        .or_else(|| l.get("title").and_then(|t| t.as_str()).map(str::to_lowercase))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn has_label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"has_label\(['"](.+?)['"]\)"#).expect("valid regex"))
}

fn autonomy_mode_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:repo_autonomy_mode|autonomy_mode)\s*([!=]=)\s*['"](.+?)['"]"#)
            .expect("valid regex")
    })
}

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)@auto-dev|\[auto-dev\]").expect("valid regex"))
}

fn target_branch_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"target_branch in \[(.+?)\]").expect("valid regex"))
}

/// Evaluate one routing condition against an event.
///
/// The interpreter stays deliberately small: `and` chaining over a fixed
/// set of predicates. Unrecognised conditions evaluate to true with a
/// warning so a config typo fails open rather than silently dropping work.
pub fn evaluate_condition(condition: &str, event: &WebhookEvent) -> bool {
    let condition = condition.trim();
    if condition.is_empty() {
        return true;
    }

    // Simple AND chaining. `is_review_comment and mentions_changes_needed`
    // stays whole: it is a single two-part predicate, not a conjunction.
    if (condition.contains(" and ") || condition.contains("&&"))
        && !condition.contains("is_review_comment")
    {
        return split_and(condition)
            .iter()
            .all(|part| evaluate_condition(part, event));
    }

    let attrs = event.payload.get("object_attributes");

    if let Some(caps) = has_label_regex().captures(condition) {
        let label = caps[1].to_lowercase();
        let has_it = event.labels.contains(&label);
        return if condition.starts_with("not ") { !has_it } else { has_it };
    }

    if let Some(caps) = autonomy_mode_regex().captures(condition) {
        let target = caps[2].to_lowercase();
        let matches = event.autonomy_mode.as_str() == target;
        return match &caps[1] {
            "==" => matches,
            _ => !matches,
        };
    }

    if condition == "note_mentions_autodev" {
        if event.event_type != "note" {
            return false;
        }
        let note = attrs
            .and_then(|a| a.get("note"))
            .and_then(|n| n.as_str())
            .unwrap_or("");
        return mention_regex().is_match(note);
    }

    if condition.contains("has_new_commits") {
        let action = attrs
            .and_then(|a| a.get("action"))
            .and_then(|a| a.as_str())
            .unwrap_or("");
        return action == "update" || action == "push";
    }

    if let Some(caps) = target_branch_regex().captures(condition) {
        let branches: Vec<String> = caps[1]
            .split(',')
            .map(|b| b.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
            .collect();
        let target = attrs
            .and_then(|a| a.get("target_branch"))
            .and_then(|t| t.as_str())
            .unwrap_or("");
        return branches.iter().any(|b| b == target);
    }

    if condition.contains("is_review_comment") {
        let note = attrs
            .and_then(|a| a.get("note"))
            .and_then(|n| n.as_str())
            .unwrap_or("");
        let noteable_type = attrs
            .and_then(|a| a.get("noteable_type"))
            .and_then(|t| t.as_str())
            .unwrap_or("");
        let is_review = noteable_type.to_lowercase() == "mergerequest";

        if condition.contains("mentions_changes_needed") {
            const CHANGE_KEYWORDS: &[&str] =
                &["change", "fix", "update", "revise", "please", "should", "must", "need"];
            let note_lower = note.to_lowercase();
            let mentions_changes = CHANGE_KEYWORDS.iter().any(|kw| note_lower.contains(kw));
            return is_review && mentions_changes;
        }
        return is_review;
    }

    tracing::warn!(condition, "Unrecognised condition");
    true
}

fn split_and(condition: &str) -> Vec<&str> {
    condition
        .split("&&")
        .flat_map(|part| part.split(" and "))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

/// Priority from event kind and labels, clamped to the queue's range.
pub fn calculate_priority(event: &WebhookEvent) -> i64 {
    let base: i64 = 5;
    let mut boost: i64 = match (event.event_type.as_str(), event.action.as_deref()) {
        ("pipeline", Some("failed")) => 3,
        ("merge_request", Some("open")) => 1,
        _ => 0,
    };

    let has = |names: &[&str]| event.labels.iter().any(|l| names.contains(&l.as_str()));
    if has(&["critical", "urgent", "p0", "priority::critical"]) {
        boost += 3;
    } else if has(&["high", "p1", "priority::high"]) {
        boost += 2;
    } else if has(&["low", "p3", "priority::low"]) {
        boost -= 1;
    }

    (base + boost).clamp(1, 10)
}

/// Normalised task payload: project slice plus an event-type-specific slice.
pub fn build_task_payload(event: &WebhookEvent) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "source": "webhook",
        "event_type": event.event_type,
        "action": event.action,
        "repo_id": event.repo_id,
        "timestamp": event.timestamp.to_rfc3339(),
    });
    if let Some(meta) = event.payload.get(REPO_META_KEY) {
        payload["repo"] = meta.clone();
    }

    let attrs = event.payload.get("object_attributes").cloned().unwrap_or_default();
    let project = event.payload.get("project").cloned().unwrap_or_default();

    payload["project"] = serde_json::json!({
        "id": project.get("id"),
        "name": project.get("name"),
        "path_with_namespace": project.get("path_with_namespace"),
        "web_url": project.get("web_url"),
        "default_branch": project.get("default_branch").cloned().unwrap_or_else(|| "main".into()),
    });

    match event.event_type.as_str() {
        "issue" => {
            payload["issue"] = serde_json::json!({
                "iid": attrs.get("iid"),
                "title": attrs.get("title"),
                "description": attrs.get("description"),
                "state": attrs.get("state"),
                "labels": event.labels,
                "url": attrs.get("url"),
            });
        }
        "merge_request" => {
            payload["merge_request"] = serde_json::json!({
                "iid": attrs.get("iid"),
                "title": attrs.get("title"),
                "description": attrs.get("description"),
                "state": attrs.get("state"),
                "source_branch": attrs.get("source_branch"),
                "target_branch": attrs.get("target_branch"),
                "labels": event.labels,
                "url": attrs.get("url"),
                "merge_status": attrs.get("merge_status"),
            });
        }
        "note" => {
            payload["note"] = serde_json::json!({
                "id": attrs.get("id"),
                "body": attrs.get("note"),
                "noteable_type": attrs.get("noteable_type"),
                "noteable_id": attrs.get("noteable_id"),
                "author": event.payload.get("user").and_then(|u| u.get("username")),
            });
            if let Some(issue) = event.payload.get("issue") {
                payload["issue"] = serde_json::json!({
                    "iid": issue.get("iid"),
                    "title": issue.get("title"),
                });
            }
            if let Some(mr) = event.payload.get("merge_request") {
                payload["merge_request"] = serde_json::json!({
                    "iid": mr.get("iid"),
                    "title": mr.get("title"),
                });
            }
        }
        "pipeline" => {
            payload["pipeline"] = serde_json::json!({
                "id": attrs.get("id"),
                "status": attrs.get("status"),
                "ref": attrs.get("ref"),
                "sha": attrs.get("sha"),
                "duration": attrs.get("duration"),
            });
        }
        "push" => {
            let commits: Vec<serde_json::Value> = event
                .payload
                .get("commits")
                .and_then(|c| c.as_array())
                .map(|commits| {
                    commits
                        .iter()
                        .take(10)
                        .map(|c| {
                            serde_json::json!({
                                "id": c.get("id"),
                                "message": c.get("message"),
                                "author": c.get("author").and_then(|a| a.get("name")),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            payload["push"] = serde_json::json!({
                "ref": event.payload.get("ref"),
                "before": event.payload.get("before"),
                "after": event.payload.get("after"),
                "commits": commits,
                "total_commits": event.payload.get("total_commits_count").cloned().unwrap_or_else(|| 0.into()),
            });
        }
        _ => {}
    }

    payload
}
