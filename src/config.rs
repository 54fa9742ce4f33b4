//! Configuration loading.
//!
//! Hierarchical merging, lowest to highest precedence: programmatic
//! defaults, project YAML (`.foreman/config.yaml`), local overrides
//! (`.foreman/local.yaml`), then `FOREMAN_`-prefixed environment variables
//! with `__` separating nesting levels.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;
use crate::services::scheduler::CronExpression;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_concurrent_agents: {0}. Must be between 1 and 100")]
    InvalidMaxConcurrent(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid abandon_after_secs: {0}. Must be positive")]
    InvalidAbandonTimeout(i64),

    #[error("Invalid session delay range: min {0} > max {1}")]
    InvalidSessionDelayRange(u64, u64),

    #[error("Invalid warning_threshold: {0}. Must be between 0 and 1")]
    InvalidWarningThreshold(f64),

    #[error("Job '{0}' has an invalid cron expression: {1}")]
    InvalidJobCron(String, String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".foreman/config.yaml"))
            .merge(Yaml::file(".foreman/local.yaml"))
            .merge(Env::prefixed("FOREMAN_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("FOREMAN_").split("__"))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.db_type != "sqlite" {
            return Err(ConfigError::ValidationFailed(format!(
                "Unsupported database type: {}",
                config.database.db_type
            )));
        }
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        let max_concurrent = config.orchestrator.max_concurrent_agents;
        if max_concurrent == 0 || max_concurrent > 100 {
            return Err(ConfigError::InvalidMaxConcurrent(max_concurrent));
        }

        if config.orchestrator.abandon_after_secs <= 0 {
            return Err(ConfigError::InvalidAbandonTimeout(
                config.orchestrator.abandon_after_secs,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.watcher.session_delay_min > config.watcher.session_delay_max {
            return Err(ConfigError::InvalidSessionDelayRange(
                config.watcher.session_delay_min,
                config.watcher.session_delay_max,
            ));
        }

        if !(0.0..=1.0).contains(&config.tokens.warning_threshold) {
            return Err(ConfigError::InvalidWarningThreshold(
                config.tokens.warning_threshold,
            ));
        }

        for (name, job) in &config.scheduling.jobs {
            if let Err(e) = CronExpression::parse(&job.cron) {
                return Err(ConfigError::InvalidJobCron(name.clone(), e.to_string()));
            }
            if job.agent.is_empty() || job.task_type.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Job '{name}' must name an agent and a task type"
                )));
            }
        }

        for (agent_id, agent) in &config.agents {
            if agent.prompt_file.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Agent '{agent_id}' has no prompt_file"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
database:
  path: /custom/foreman.db
orchestrator:
  abandon_after_secs: 3600
  max_concurrent_agents: 4
watcher:
  max_session_duration: 1800
llm:
  default_provider: claude
  fallback_provider: codex
  auto_fallback_on_rate_limit: true
  providers:
    claude:
      command: claude
      prompt_flag: "-p"
agents:
  builder:
    name: Builder
    prompt_file: prompts/builder.md
scheduling:
  jobs:
    nightly_audit:
      agent: security
      task_type: security_scan
      cron: "0 2 * * *"
      description: Nightly dependency audit
"#;
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.database.path, "/custom/foreman.db");
        assert_eq!(config.orchestrator.abandon_after_secs, 3600);
        assert!(config.llm.auto_fallback_on_rate_limit);
        assert_eq!(config.scheduling.jobs["nightly_audit"].task_type, "security_scan");
        ConfigLoader::validate(&config).expect("parsed config should be valid");
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let mut config = Config::default();
        config.scheduling.jobs.insert(
            "broken".to_string(),
            crate::domain::models::JobConfig {
                agent: "pm".to_string(),
                task_type: "analyze_repo".to_string(),
                cron: "not a cron".to_string(),
                enabled: true,
                description: String::new(),
            },
        );
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidJobCron(_, _))
        ));
    }

    #[test]
    fn test_unsupported_database_type_rejected() {
        let mut config = Config::default();
        config.database.db_type = "postgres".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_invalid_session_delay_range() {
        let mut config = Config::default();
        config.watcher.session_delay_min = 90;
        config.watcher.session_delay_max = 30;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidSessionDelayRange(90, 30))
        ));
    }

    #[test]
    fn test_zero_abandon_timeout_rejected() {
        let mut config = Config::default();
        config.orchestrator.abandon_after_secs = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidAbandonTimeout(0))
        ));
    }
}
