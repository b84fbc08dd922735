//! SQLite initialization and versioned schema migration.
//!
//! The applied version is tracked in `PRAGMA user_version`. Each migration
//! runs in its own transaction together with the version bump, so a failed
//! upgrade leaves the previous version intact.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info, warn};

/// Ordered schema migrations. Versions start at 1 and never change once
/// released.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("schema.sql"))];

/// Open (or create) the database at `db_path`, configure every connection
/// and bring the schema up to date.
///
/// # Errors
/// Returns an error if the connection cannot be opened or a migration
/// statement fails.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "Could not create database directory");
            }
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { configure_pragmas(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    let version = run_migrations(&pool).await?;
    info!(path = %db_path, schema_version = version, "Trade store ready");
    Ok(pool)
}

/// Currently applied schema version; 0 for a fresh file.
///
/// # Errors
/// Returns an error if the pragma cannot be read.
pub async fn schema_version(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("PRAGMA user_version").fetch_one(pool).await?;
    Ok(row.get(0))
}

async fn run_migrations(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let start = schema_version(pool).await?;
    let mut current = start;

    for (version, script) in MIGRATIONS.iter().filter(|(v, _)| *v > start) {
        info!(from = current, to = version, "Applying schema migration");
        let mut tx = pool.begin().await?;
        for statement in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        // PRAGMA does not accept bound parameters
        sqlx::query(&format!("PRAGMA user_version = {}", version))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        current = *version;
    }

    Ok(current)
}

async fn configure_pragmas(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // journal_mode answers with the mode actually in effect
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.get(0);

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;

    debug!(journal_mode = %journal_mode, "SQLite connection configured");
    Ok(())
}
