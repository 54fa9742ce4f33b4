//! Embedded schema migrations.
//!
//! The schema evolves additively only, so the ledger is just the set of
//! applied version numbers. Each step runs together with its ledger row in
//! one transaction: a migration either landed completely and is recorded,
//! or left no trace.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;
use thiserror::Error;

/// One embedded migration step.
struct MigrationStep {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[MigrationStep] = &[
    MigrationStep {
        version: 1,
        description: "initial schema",
        sql: include_str!("../../../migrations/001_initial_schema.sql"),
    },
    MigrationStep {
        version: 2,
        description: "agent mail and token accounting",
        sql: include_str!("../../../migrations/002_agent_mail.sql"),
    },
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration {version} ({description}) failed: {source}")]
    Apply {
        version: i64,
        description: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("Failed to read migration ledger: {0}")]
    Ledger(#[source] sqlx::Error),
}

/// Bring the schema up to date. Returns the versions applied on this run,
/// in order; an empty list means the schema was already current.
pub async fn migrate(pool: &SqlitePool) -> Result<Vec<i64>, MigrationError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(MigrationError::Ledger)?;

    let applied: HashSet<i64> = sqlx::query_as::<_, (i64,)>("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(MigrationError::Ledger)?
        .into_iter()
        .map(|(version,)| version)
        .collect();

    let mut ran = Vec::new();
    for step in MIGRATIONS {
        if applied.contains(&step.version) {
            continue;
        }

        let fail = |source| MigrationError::Apply {
            version: step.version,
            description: step.description,
            source,
        };

        let mut tx = pool.begin().await.map_err(fail)?;
        sqlx::raw_sql(step.sql).execute(&mut *tx).await.map_err(fail)?;
        sqlx::query("INSERT INTO schema_migrations (version, description, applied_at) VALUES (?, ?, ?)")
            .bind(step.version)
            .bind(step.description)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(fail)?;
        tx.commit().await.map_err(fail)?;

        tracing::debug!(version = step.version, description = step.description, "Applied migration");
        ran.push(step.version);
    }

    Ok(ran)
}

/// Latest applied schema version, for diagnostics. Zero on a fresh store.
pub async fn schema_version(pool: &SqlitePool) -> Result<i64, MigrationError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_optional(pool)
            .await
            .map_err(MigrationError::Ledger)?;
    Ok(row.map_or(0, |(version,)| version))
}
