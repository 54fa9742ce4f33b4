//! Repo domain model.
//!
//! A Repo is the tenant boundary: every webhook, schedule, and task is
//! scoped to one (or, for global maintenance, none).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source-forge hosting the repo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForgeProvider {
    Gitlab,
    Github,
}

impl ForgeProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gitlab => "gitlab",
            Self::Github => "github",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gitlab" => Some(Self::Gitlab),
            "github" => Some(Self::Github),
            _ => None,
        }
    }
}

/// How much the fleet is allowed to do without a human in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    /// Every approval waits for a human.
    Guided,
    /// Approvals meeting repo-configured thresholds are granted automatically.
    Full,
}

impl Default for AutonomyMode {
    fn default() -> Self {
        Self::Guided
    }
}

impl AutonomyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guided => "guided",
            Self::Full => "full",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "guided" => Some(Self::Guided),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// A registered repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub id: String,
    pub name: String,
    pub provider: ForgeProvider,
    /// Base URL of the forge instance, e.g. `https://gitlab.example.com`.
    pub forge_base_url: String,
    /// Forge-specific project path or numeric id.
    pub project_ref: String,
    /// Unique URL-safe identifier.
    pub slug: String,
    pub default_branch: String,
    pub autonomy_mode: AutonomyMode,
    /// Free-form per-repo settings: webhook secret, polling cursor,
    /// auto-approve thresholds, per-job scheduling overrides.
    pub settings: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repo {
    pub fn new(
        name: impl Into<String>,
        provider: ForgeProvider,
        forge_base_url: impl Into<String>,
        project_ref: impl Into<String>,
        slug: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            provider,
            forge_base_url: forge_base_url.into(),
            project_ref: project_ref.into(),
            slug: slug.into(),
            default_branch: "main".to_string(),
            autonomy_mode: AutonomyMode::default(),
            settings: serde_json::Value::Object(serde_json::Map::new()),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_autonomy_mode(mut self, mode: AutonomyMode) -> Self {
        self.autonomy_mode = mode;
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    /// Webhook shared secret from repo settings, if configured.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.settings.get("webhook_secret").and_then(|v| v.as_str())
    }

    /// Per-job scheduling override: Some(enabled) when the repo overrides
    /// the job's catalog-level enabled flag.
    pub fn scheduling_override(&self, job_name: &str) -> Option<bool> {
        self.settings
            .get("scheduling")
            .and_then(|s| s.get(job_name))
            .and_then(|j| j.get("enabled"))
            .and_then(|e| e.as_bool())
    }

    /// Auto-approve threshold from repo settings, falling back to a default.
    pub fn auto_approve_threshold(&self, key: &str, default: f64) -> f64 {
        self.settings
            .get("auto_approve")
            .and_then(|a| a.get(key))
            .and_then(|v| v.as_f64())
            .unwrap_or(default)
    }

    /// Polling cursor (`settings.polling.last_polled_at`) as RFC 3339.
    pub fn polling_cursor(&self) -> Option<&str> {
        self.settings
            .get("polling")
            .and_then(|p| p.get("last_polled_at"))
            .and_then(|v| v.as_str())
    }

    /// Whether issue polling is enabled for this repo (default true).
    pub fn polling_enabled(&self) -> bool {
        self.settings
            .get("polling")
            .and_then(|p| p.get("enabled"))
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repo_with(settings: serde_json::Value) -> Repo {
        Repo::new("demo", ForgeProvider::Gitlab, "https://gitlab.example.com", "group/demo", "demo")
            .with_settings(settings)
    }

    #[test]
    fn test_webhook_secret_lookup() {
        let repo = repo_with(json!({"webhook_secret": "s3cret"}));
        assert_eq!(repo.webhook_secret(), Some("s3cret"));
        assert_eq!(repo_with(json!({})).webhook_secret(), None);
    }

    #[test]
    fn test_scheduling_override() {
        let repo = repo_with(json!({"scheduling": {"nightly_audit": {"enabled": false}}}));
        assert_eq!(repo.scheduling_override("nightly_audit"), Some(false));
        assert_eq!(repo.scheduling_override("other_job"), None);
    }

    #[test]
    fn test_auto_approve_threshold_default() {
        let repo = repo_with(json!({"auto_approve": {"spec_confidence": 9}}));
        assert!((repo.auto_approve_threshold("spec_confidence", 8.0) - 9.0).abs() < f64::EPSILON);
        assert!((repo.auto_approve_threshold("merge_score", 9.0) - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_polling_settings() {
        let repo = repo_with(json!({"polling": {"enabled": false, "last_polled_at": "2026-01-01T00:00:00Z"}}));
        assert!(!repo.polling_enabled());
        assert_eq!(repo.polling_cursor(), Some("2026-01-01T00:00:00Z"));
        assert!(repo_with(json!({})).polling_enabled());
    }
}
