//! Source-forge client contract.
//!
//! The core is ignorant of wire protocols; it only demands these
//! capabilities from an external client implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::models::Repo;

/// Query parameters for issue listings.
#[derive(Debug, Clone, Default)]
pub struct IssueQuery {
    /// opened | closed; None for all.
    pub state: Option<String>,
    /// Only issues updated after this RFC 3339 instant.
    pub updated_after: Option<String>,
    /// Label filter (all must match).
    pub labels: Vec<String>,
    pub per_page: usize,
}

/// A forge issue, reduced to the fields the core consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeIssue {
    pub id: i64,
    pub iid: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Fields for issue creation.
#[derive(Debug, Clone, Serialize)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
}

/// Minimal forge capability surface consumed by the core (issue polling,
/// open-issue caps, issue creation on approval).
#[async_trait]
pub trait ForgeClient: Send + Sync {
    async fn list_issues(&self, repo: &Repo, query: IssueQuery) -> DomainResult<Vec<ForgeIssue>>;

    async fn create_issue(&self, repo: &Repo, issue: NewIssue) -> DomainResult<ForgeIssue>;

    async fn comment_on_issue(&self, repo: &Repo, issue_iid: i64, body: &str) -> DomainResult<()>;
}
