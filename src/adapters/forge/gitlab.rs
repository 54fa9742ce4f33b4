//! GitLab implementation of the forge client contract.
//!
//! Only the capabilities the core consumes are implemented here; richer
//! forge operations belong to the agents themselves.

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Repo;
use crate::domain::ports::{ForgeClient, ForgeIssue, IssueQuery, NewIssue};

pub struct GitLabForge {
    client: reqwest::Client,
    token: Option<String>,
}

impl GitLabForge {
    /// Token from `GITLAB_TOKEN`; unauthenticated clients still work for
    /// public projects.
    pub fn from_env() -> Self {
        Self {
            client: reqwest::Client::new(),
            token: std::env::var("GITLAB_TOKEN").ok(),
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: Some(token.into()),
        }
    }

    fn project_url(&self, repo: &Repo) -> String {
        // Project paths are URL-encoded path segments; numeric ids pass
        // through unchanged.
        let encoded = repo.project_ref.replace('/', "%2F");
        format!(
            "{}/api/v4/projects/{encoded}",
            repo.forge_base_url.trim_end_matches('/')
        )
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header("PRIVATE-TOKEN", token),
            None => builder,
        }
    }

    /// Send a request, retrying transient failures (connection errors,
    /// timeouts, 5xx) with bounded exponential back-off. Validation-class
    /// responses are surfaced immediately.
    async fn send_with_retry(
        &self,
        operation: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> DomainResult<reqwest::Response> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(250))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(Some(Duration::from_secs(20)))
            .build();

        backoff::future::retry(policy, || async {
            let response = self
                .request(build())
                .send()
                .await
                .map_err(|e| {
                    let err = DomainError::ForgeError(format!("{operation} request failed: {e}"));
                    if e.is_connect() || e.is_timeout() {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })?;

            let status = response.status();
            if status.is_server_error() {
                return Err(backoff::Error::transient(DomainError::ForgeError(format!(
                    "{operation} returned {status}"
                ))));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DomainError::ForgeError(format!(
                    "{operation} returned {status}"
                ))));
            }
            Ok(response)
        })
        .await
    }
}

#[async_trait]
impl ForgeClient for GitLabForge {
    async fn list_issues(&self, repo: &Repo, query: IssueQuery) -> DomainResult<Vec<ForgeIssue>> {
        let url = format!("{}/issues", self.project_url(repo));
        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(state) = &query.state {
            params.push(("state".to_string(), state.clone()));
        }
        if let Some(updated_after) = &query.updated_after {
            params.push(("updated_after".to_string(), updated_after.clone()));
        }
        if !query.labels.is_empty() {
            params.push(("labels".to_string(), query.labels.join(",")));
        }
        if query.per_page > 0 {
            params.push(("per_page".to_string(), query.per_page.to_string()));
        }
        params.push(("order_by".to_string(), "updated_at".to_string()));
        params.push(("sort".to_string(), "desc".to_string()));

        let response = self
            .send_with_retry("list_issues", || self.client.get(&url).query(&params))
            .await?;

        response
            .json::<Vec<ForgeIssue>>()
            .await
            .map_err(|e| DomainError::ForgeError(format!("list_issues decode failed: {e}")))
    }

    async fn create_issue(&self, repo: &Repo, issue: NewIssue) -> DomainResult<ForgeIssue> {
        let url = format!("{}/issues", self.project_url(repo));
        let body = serde_json::json!({
            "title": issue.title,
            "description": issue.description,
            "labels": issue.labels.join(","),
        });

        let response = self
            .send_with_retry("create_issue", || self.client.post(&url).json(&body))
            .await?;

        response
            .json::<ForgeIssue>()
            .await
            .map_err(|e| DomainError::ForgeError(format!("create_issue decode failed: {e}")))
    }

    async fn comment_on_issue(&self, repo: &Repo, issue_iid: i64, body: &str) -> DomainResult<()> {
        let url = format!("{}/issues/{issue_iid}/notes", self.project_url(repo));
        let note = serde_json::json!({"body": body});
        self.send_with_retry("comment_on_issue", || self.client.post(&url).json(&note))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ForgeProvider;

    fn repo_at(base_url: &str) -> Repo {
        Repo::new("demo", ForgeProvider::Gitlab, base_url, "group/demo", "demo")
    }

    #[test]
    fn test_project_url_encodes_path() {
        let forge = GitLabForge::with_token("t");
        let repo = repo_at("https://gitlab.example.com/");
        assert_eq!(
            forge.project_url(&repo),
            "https://gitlab.example.com/api/v4/projects/group%2Fdemo"
        );
    }

    #[tokio::test]
    async fn test_list_issues_parses_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/projects/group%2Fdemo/issues")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"id": 101, "iid": 7, "title": "Crash on save", "state": "opened",
                     "labels": ["bug"], "web_url": "https://g/issues/7"}]"#,
            )
            .create_async()
            .await;

        let forge = GitLabForge::with_token("t");
        let repo = repo_at(&server.url());
        let issues = forge
            .list_issues(
                &repo,
                IssueQuery {
                    state: Some("opened".to_string()),
                    per_page: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].iid, 7);
        assert_eq!(issues[0].labels, vec!["bug"]);
    }

    #[tokio::test]
    async fn test_list_issues_client_error_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/group%2Fdemo/issues")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let forge = GitLabForge::with_token("t");
        let repo = repo_at(&server.url());
        let err = forge.list_issues(&repo, IssueQuery::default()).await.unwrap_err();
        assert!(matches!(err, DomainError::ForgeError(_)));
    }
}
