//! Domain models for the Foreman core.

pub mod agent;
pub mod approval;
pub mod config;
pub mod outcome;
pub mod repo;
pub mod task;

pub use agent::{AgentMessage, AgentState, AgentStatus, MessageType};
pub use approval::{Approval, ApprovalStatus, ApprovalType};
pub use config::{
    AgentConfig, AutoFeatureConfig, Config, DatabaseConfig, JobConfig, LlmConfig, LoggingConfig,
    OrchestratorConfig, ProductConfig, ProviderConfig, RouteConfig, RouteTarget, SchedulingConfig,
    TokenConfig, WatcherConfig, WebhookServerConfig,
};
pub use outcome::{OutcomeKind, TaskOutcome, TokenUsage};
pub use repo::{AutonomyMode, ForgeProvider, Repo};
pub use task::{
    agent_task_types, clamp_priority, payload_identifier, Task, TaskApprovalStatus, TaskStatus,
    PRIORITY_MAX, PRIORITY_MIN, UNIVERSAL_TASK_TYPES,
};
