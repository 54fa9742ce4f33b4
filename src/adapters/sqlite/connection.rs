//! Opening the shared store file.
//!
//! Every foreman process on a host (webhook server, scheduler, one process
//! per agent runner) opens the same database file, so the connection tuning
//! follows from the claim protocol rather than from throughput: WAL keeps
//! readers off the writer's back, and the busy timeout has to outlast a
//! burst of claim transactions from contending runner processes.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreOpenError {
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to open database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
}

/// Builder for the per-process pool over the shared store file.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    path: PathBuf,
    max_connections: u32,
    busy_timeout: Duration,
}

impl StoreOptions {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(30),
        }
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// How long a statement waits on the single writer before giving up.
    /// Claim transactions are short but frequent; the default covers a
    /// whole fleet of runners claiming at once.
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Open the pool, creating the file and its parent directory on first
    /// use.
    pub async fn open(self) -> Result<SqlitePool, StoreOpenError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    StoreOpenError::CreateDirectory { path: parent.to_path_buf(), source }
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout);

        SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await
            .map_err(|source| StoreOpenError::Open { path: self.path, source })
    }
}

/// In-memory store for tests. Pinned to a single connection so the
/// database lives exactly as long as the pool; WAL is pointless without a
/// file and is left off.
pub async fn open_in_memory() -> Result<SqlitePool, StoreOpenError> {
    let options = "sqlite::memory:"
        .parse::<SqliteConnectOptions>()
        .expect("static in-memory connection string is always valid")
        .shared_cache(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|source| StoreOpenError::Open { path: PathBuf::from(":memory:"), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state/foreman.db");

        let pool = StoreOptions::at(&path).open().await.unwrap();
        sqlx::query("SELECT 1").fetch_one(&pool).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_two_pools_share_one_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.db");

        let writer = StoreOptions::at(&path).max_connections(2).open().await.unwrap();
        sqlx::query("CREATE TABLE marks (id INTEGER PRIMARY KEY)")
            .execute(&writer)
            .await
            .unwrap();
        sqlx::query("INSERT INTO marks (id) VALUES (1)")
            .execute(&writer)
            .await
            .unwrap();

        // A second process opening the same path sees the committed row.
        let reader = StoreOptions::at(&path).open().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM marks")
            .fetch_one(&reader)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_in_memory_store_persists_across_acquires() {
        let pool = open_in_memory().await.unwrap();
        sqlx::query("CREATE TABLE marks (id INTEGER PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        // Same single connection, so the table is still there.
        sqlx::query("INSERT INTO marks (id) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();
    }
}
