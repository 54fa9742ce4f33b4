//! Configuration model.
//!
//! Loaded by the figment-based `ConfigLoader` from defaults, project YAML,
//! local overrides, and `FOREMAN_`-prefixed environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Optional pub/sub endpoint for an external notifier implementation.
    pub redis_url: Option<String>,
    pub logging: LoggingConfig,
    pub orchestrator: OrchestratorConfig,
    pub watcher: WatcherConfig,
    pub tokens: TokenConfig,
    pub llm: LlmConfig,
    /// Per-agent runner configuration keyed by agent id.
    pub agents: HashMap<String, AgentConfig>,
    pub webhook: WebhookServerConfig,
    /// Routing map: "event_type:action" (or bare event_type) to a route.
    /// A null value means the event is deliberately ignored.
    pub webhook_triggers: HashMap<String, Option<RouteConfig>>,
    pub scheduling: SchedulingConfig,
    pub product: ProductConfig,
}

/// Database backend selection. SQLite is the implemented backend; the
/// server fields exist so a networked engine can slot in without a schema
/// change to this surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Backend type; only "sqlite" is supported.
    pub db_type: String,
    /// SQLite database file path.
    pub path: String,
    pub max_connections: u32,
    // -- Networked-backend fields, unused under sqlite --
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    /// Env var holding the password; preferred over `password`.
    pub password_env: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            path: ".foreman/foreman.db".to_string(),
            max_connections: 5,
            host: None,
            port: None,
            name: None,
            user: None,
            password_env: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Claimed tasks older than this are released back to pending.
    pub abandon_after_secs: i64,
    /// Fleet-wide cap on simultaneously working agents.
    pub max_concurrent_agents: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            abandon_after_secs: 7200,
            max_concurrent_agents: 10,
        }
    }
}

/// Agent runner supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Seconds before a worker session is forcibly stopped.
    pub max_session_duration: u64,
    /// Base restart delay; doubled per consecutive failure, capped at 300 s.
    pub restart_delay: u64,
    /// Randomised throttle applied before each session start.
    pub session_delay_min: u64,
    pub session_delay_max: u64,
    /// Supervision loop sleep between health checks.
    pub health_check_interval: u64,
    /// Directory holding runner status files, the rate-limit register and
    /// agent enable flags.
    pub control_dir: String,
    /// Per-task worker output log directory.
    pub output_store_dir: Option<String>,
    /// Optional object-storage mirror for full logs.
    pub output_store_s3_bucket: Option<String>,
    pub output_store_s3_prefix: String,
    /// Tail of worker output embedded in the task result.
    pub output_excerpt_chars: usize,
    /// Cap on the extracted summary string.
    pub output_summary_chars: usize,
    /// In-memory tail buffer while the worker streams.
    pub output_stream_buffer_chars: usize,
    /// Working directory handed to worker subprocesses.
    pub working_dir: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            max_session_duration: 3600,
            restart_delay: 10,
            session_delay_min: 30,
            session_delay_max: 60,
            health_check_interval: 30,
            control_dir: ".foreman/control".to_string(),
            output_store_dir: None,
            output_store_s3_bucket: None,
            output_store_s3_prefix: "foreman/task-outputs".to_string(),
            output_excerpt_chars: 4000,
            output_summary_chars: 800,
            output_stream_buffer_chars: 200_000,
            working_dir: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Daily token budget per runner; 0 means unlimited.
    pub daily_budget: i64,
    /// Fraction of the budget at which a warning is logged.
    pub warning_threshold: f64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            daily_budget: 0,
            warning_threshold: 0.8,
        }
    }
}

/// LLM provider selection and CLI invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub default_provider: String,
    pub fallback_provider: Option<String>,
    pub auto_fallback_on_rate_limit: bool,
    /// Environment variable consulted for a manual provider override.
    pub manual_override_env: String,
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: "claude".to_string(),
            fallback_provider: None,
            auto_fallback_on_rate_limit: false,
            manual_override_env: "FOREMAN_LLM_PROVIDER".to_string(),
            providers: HashMap::new(),
        }
    }
}

/// How to invoke one provider's CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Flag preceding the prompt text; empty means positional.
    pub prompt_flag: String,
    /// Maps agent-level model names to provider-specific ones. An empty map
    /// suppresses the model flag entirely.
    pub model_map: Option<HashMap<String, String>>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec![],
            prompt_flag: "-p".to_string(),
            model_map: None,
        }
    }
}

/// Per-agent runner settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub prompt_file: String,
    /// Overrides the built-in task-type catalog when set.
    pub task_types: Option<Vec<String>>,
    pub session_max_tokens: Option<i64>,
    /// Per-agent provider override.
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookServerConfig {
    pub host: String,
    pub port: u16,
    /// Env-wide fallback secret when a repo has none configured.
    pub secret_env: String,
}

impl Default for WebhookServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8200,
            secret_env: "FOREMAN_WEBHOOK_SECRET".to_string(),
        }
    }
}

/// One webhook route target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTarget {
    pub agent: String,
    pub task_type: String,
    #[serde(default)]
    pub condition: Option<String>,
}

/// A route is either a single target or a parallel fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteConfig {
    Parallel { parallel: Vec<RouteTarget> },
    Single(RouteTarget),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub enabled: bool,
    pub jobs: HashMap<String, JobConfig>,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jobs: HashMap::new(),
        }
    }
}

/// One scheduled job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub agent: String,
    pub task_type: String,
    /// 5-field cron: minute hour day month weekday (Sunday = 0).
    pub cron: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductConfig {
    pub auto_feature_creation: AutoFeatureConfig,
}

/// Guard rails for the auto feature creation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoFeatureConfig {
    pub enabled: bool,
    /// Markdown checklist driving feature generation.
    pub guidance_path: String,
    pub max_new_issues_per_run: usize,
    pub max_open_issues: usize,
    pub label: String,
}

impl Default for AutoFeatureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            guidance_path: ".foreman/product_guidance.md".to_string(),
            max_new_issues_per_run: 3,
            max_open_issues: 6,
            label: "auto-feature".to_string(),
        }
    }
}
