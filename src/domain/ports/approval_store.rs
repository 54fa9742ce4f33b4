//! Approval store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Approval, ApprovalStatus, Task};

/// Approval queue storage.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Insert an approval with whatever status it carries. When the policy
    /// auto-approves at creation, `follow_up` is inserted in the same
    /// transaction so an approved spec is never observed without its task.
    async fn insert(&self, approval: &Approval, follow_up: Option<&Task>) -> DomainResult<()>;

    async fn get(&self, id: &str) -> DomainResult<Option<Approval>>;

    /// CAS from pending to the given terminal status, writing reviewer notes
    /// and `reviewed_at`. A follow-up task, when present, is inserted in the
    /// same transaction as the status flip. Returns false when the approval
    /// was not pending.
    async fn resolve(
        &self,
        id: &str,
        status: ApprovalStatus,
        notes: Option<&str>,
        follow_up: Option<&Task>,
    ) -> DomainResult<bool>;

    async fn list_pending(&self) -> DomainResult<Vec<Approval>>;

    async fn list_all(&self, limit: i64) -> DomainResult<Vec<Approval>>;
}
