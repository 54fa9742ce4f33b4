//! SQLite implementation of the repo store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AutonomyMode, ForgeProvider, Repo};
use crate::domain::ports::RepoStore;

#[derive(Clone)]
pub struct SqliteRepoStore {
    pool: SqlitePool,
}

impl SqliteRepoStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepoStore for SqliteRepoStore {
    async fn insert(&self, repo: &Repo) -> DomainResult<()> {
        let settings_json = serde_json::to_string(&repo.settings)?;
        sqlx::query(
            r#"INSERT INTO repos (id, name, provider, forge_base_url, project_ref,
               slug, default_branch, autonomy_mode, settings, active, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&repo.id)
        .bind(&repo.name)
        .bind(repo.provider.as_str())
        .bind(&repo.forge_base_url)
        .bind(&repo.project_ref)
        .bind(&repo.slug)
        .bind(&repo.default_branch)
        .bind(repo.autonomy_mode.as_str())
        .bind(&settings_json)
        .bind(i64::from(repo.active))
        .bind(repo.created_at.to_rfc3339())
        .bind(repo.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, repo: &Repo) -> DomainResult<bool> {
        let settings_json = serde_json::to_string(&repo.settings)?;
        let result = sqlx::query(
            r#"UPDATE repos SET name = ?, provider = ?, forge_base_url = ?,
               project_ref = ?, slug = ?, default_branch = ?, autonomy_mode = ?,
               settings = ?, active = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&repo.name)
        .bind(repo.provider.as_str())
        .bind(&repo.forge_base_url)
        .bind(&repo.project_ref)
        .bind(&repo.slug)
        .bind(&repo.default_branch)
        .bind(repo.autonomy_mode.as_str())
        .bind(&settings_json)
        .bind(i64::from(repo.active))
        .bind(Utc::now().to_rfc3339())
        .bind(&repo.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Repo>> {
        let row: Option<RepoRow> = sqlx::query_as("SELECT * FROM repos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_project_ref(&self, project_ref: &str) -> DomainResult<Option<Repo>> {
        let row: Option<RepoRow> = sqlx::query_as("SELECT * FROM repos WHERE project_ref = ?")
            .bind(project_ref)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> DomainResult<Option<Repo>> {
        let row: Option<RepoRow> = sqlx::query_as("SELECT * FROM repos WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, active_only: bool) -> DomainResult<Vec<Repo>> {
        let sql = if active_only {
            "SELECT * FROM repos WHERE active = 1 ORDER BY created_at ASC"
        } else {
            "SELECT * FROM repos ORDER BY created_at ASC"
        };
        let rows: Vec<RepoRow> = sqlx::query_as(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn deactivate(&self, id: &str) -> DomainResult<bool> {
        let result = sqlx::query("UPDATE repos SET active = 0, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM repos WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct RepoRow {
    id: String,
    name: String,
    provider: String,
    forge_base_url: String,
    project_ref: String,
    slug: String,
    default_branch: String,
    autonomy_mode: String,
    settings: Option<String>,
    active: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<RepoRow> for Repo {
    type Error = DomainError;

    fn try_from(row: RepoRow) -> Result<Self, Self::Error> {
        let provider = ForgeProvider::from_str(&row.provider).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid provider: {}", row.provider))
        })?;
        let autonomy_mode = AutonomyMode::from_str(&row.autonomy_mode).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid autonomy mode: {}", row.autonomy_mode))
        })?;

        Ok(Repo {
            id: row.id,
            name: row.name,
            provider,
            forge_base_url: row.forge_base_url,
            project_ref: row.project_ref,
            slug: row.slug,
            default_branch: row.default_branch,
            autonomy_mode,
            settings: super::parse_payload(row.settings),
            active: row.active != 0,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use serde_json::json;

    async fn setup() -> SqliteRepoStore {
        SqliteRepoStore::new(create_migrated_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_and_lookups() {
        let store = setup().await;
        let repo = Repo::new("demo", ForgeProvider::Gitlab, "https://gitlab.example.com", "group/demo", "demo")
            .with_settings(json!({"webhook_secret": "s"}));
        store.insert(&repo).await.unwrap();

        assert!(store.get(&repo.id).await.unwrap().is_some());
        assert!(store.get_by_project_ref("group/demo").await.unwrap().is_some());
        assert!(store.get_by_slug("demo").await.unwrap().is_some());
        assert!(store.get_by_project_ref("group/other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_hides_from_active_list() {
        let store = setup().await;
        let repo = Repo::new("demo", ForgeProvider::Gitlab, "https://gitlab.example.com", "group/demo", "demo");
        store.insert(&repo).await.unwrap();

        assert_eq!(store.list(true).await.unwrap().len(), 1);
        assert!(store.deactivate(&repo.id).await.unwrap());
        assert!(store.list(true).await.unwrap().is_empty());
        assert_eq!(store.list(false).await.unwrap().len(), 1);

        assert!(store.delete(&repo.id).await.unwrap());
        assert!(store.list(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_round_trip() {
        let store = setup().await;
        let mut repo = Repo::new("demo", ForgeProvider::Gitlab, "https://gitlab.example.com", "group/demo", "demo");
        store.insert(&repo).await.unwrap();

        repo.autonomy_mode = AutonomyMode::Full;
        repo.settings = json!({"polling": {"last_polled_at": "2026-02-01T00:00:00Z"}});
        assert!(store.update(&repo).await.unwrap());

        let loaded = store.get(&repo.id).await.unwrap().unwrap();
        assert_eq!(loaded.autonomy_mode, AutonomyMode::Full);
        assert_eq!(loaded.polling_cursor(), Some("2026-02-01T00:00:00Z"));
    }
}
