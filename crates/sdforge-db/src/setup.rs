//! Database setup and initialization.
//!
//! Entry points call [`setup_database`] with the resolved database path; the
//! schema is created idempotently with `IF NOT EXISTS`.

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqliteConnectOptions};
use std::path::Path;

/// Sets up the `SQLite` database connection and ensures the schema exists.
///
/// Creates the database file (and its parent directory) if missing, then
/// creates all tables and indexes.
///
/// # Errors
///
/// Returns an error if the database file cannot be opened or created, or if
/// schema creation fails.
pub async fn setup_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true),
    )
    .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Sets up an in-memory `SQLite` database for testing.
///
/// Creates a fresh in-memory database with the full production schema.
#[cfg(any(test, feature = "test-utils"))]
pub async fn setup_test_database() -> Result<SqlitePool> {
    // A single connection serializes concurrent transactions; the shared-cache
    // in-memory database otherwise reports SQLITE_LOCKED deadlocks that a
    // file-backed database (with its busy timeout) would never surface.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Creates the complete database schema.
///
/// Safe to call multiple times; every statement uses `IF NOT EXISTS`.
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Generation jobs: the durable job state machine
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            model_id TEXT NOT NULL,
            params TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            progress REAL NOT NULL DEFAULT 0.0,
            error TEXT,
            result TEXT,
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Dequeue scans by status then age
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at)",
    )
    .execute(pool)
    .await?;

    // Model process registry: one row per model ever started
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS model_processes (
            model_id TEXT PRIMARY KEY,
            exec_mode TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'stopped',
            pid INTEGER,
            port INTEGER,
            started_at TEXT,
            last_heartbeat_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let pool = setup_test_database().await.expect("setup");
        create_schema(&pool).await.expect("second create must be a no-op");
    }

    #[tokio::test]
    async fn setup_creates_database_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("sdforge.db");
        let _pool = setup_database(&path).await.expect("setup");
        assert!(path.exists());
    }
}
