//! Embedded schema migrations.
//!
//! Migrations ship inside the binary and are applied in version order
//! against a `schema_migrations` ledger table, so opening any database
//! brings it to the current schema.

use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration {version} failed: {source}")]
    Failed {
        version: i64,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to read schema version: {0}")]
    VersionCheck(#[source] sqlx::Error),
}

struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema",
    sql: include_str!("../../../migrations/001_initial_schema.sql"),
}];

/// Apply all pending migrations; returns how many were applied.
pub async fn run_migrations(pool: &SqlitePool) -> Result<usize, MigrationError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now')),
            description TEXT
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| MigrationError::Failed { version: 0, source: e })?;

    let current = current_version(pool).await?;
    let mut applied = 0;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        sqlx::raw_sql(migration.sql)
            .execute(pool)
            .await
            .map_err(|e| MigrationError::Failed {
                version: migration.version,
                source: e,
            })?;

        sqlx::query("INSERT OR IGNORE INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(pool)
            .await
            .map_err(|e| MigrationError::Failed {
                version: migration.version,
                source: e,
            })?;

        applied += 1;
    }

    Ok(applied)
}

/// Highest applied migration version, 0 for a fresh database.
pub async fn current_version(pool: &SqlitePool) -> Result<i64, MigrationError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_optional(pool)
            .await
            .map_err(MigrationError::VersionCheck)?;
    Ok(row.map(|(v,)| v).unwrap_or(0))
}
