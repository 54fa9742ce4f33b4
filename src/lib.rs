//! Foreman - multi-tenant orchestrator for a fleet of autonomous
//! code-writing agents.
//!
//! - Durable priority task queue with race-free claiming
//! - Agent runner supervision with provider rate-limit backpressure
//! - Webhook-to-task routing with a small condition DSL
//! - Cron scheduler with internal maintenance jobs
//! - Approval workflow with threshold-based auto-approval

pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod logging;
pub mod services;

pub use config::ConfigLoader;
pub use services::Orchestrator;
