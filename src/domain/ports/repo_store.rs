//! Repo store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Repo;

/// Tenant registry storage.
#[async_trait]
pub trait RepoStore: Send + Sync {
    async fn insert(&self, repo: &Repo) -> DomainResult<()>;

    /// Full-row update; returns false when the repo does not exist.
    async fn update(&self, repo: &Repo) -> DomainResult<bool>;

    async fn get(&self, id: &str) -> DomainResult<Option<Repo>>;

    /// Lookup by forge project path or numeric id, as sent in webhooks.
    async fn get_by_project_ref(&self, project_ref: &str) -> DomainResult<Option<Repo>>;

    async fn get_by_slug(&self, slug: &str) -> DomainResult<Option<Repo>>;

    async fn list(&self, active_only: bool) -> DomainResult<Vec<Repo>>;

    /// Soft delete: mark inactive.
    async fn deactivate(&self, id: &str) -> DomainResult<bool>;

    /// Hard delete.
    async fn delete(&self, id: &str) -> DomainResult<bool>;
}
