//! Reflection sink contract.
//!
//! Reflections are generated by an external LLM collaborator and shipped to
//! a learning endpoint. The runner only knows this contract; delivery is
//! best-effort and never fatal.

use async_trait::async_trait;

use crate::domain::models::Task;

/// Receives post-task reflections for the learning system.
#[async_trait]
pub trait ReflectionClient: Send + Sync {
    async fn record_reflection(
        &self,
        agent_id: &str,
        task: &Task,
        success: bool,
        output_excerpt: &str,
    );
}
