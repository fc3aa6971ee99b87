//! Database initialization
//!
//! Creates the database file on first run and the tables the worker touches.
//! All statements are idempotent, so this runs on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL lets producers enqueue while the worker holds a read transaction
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables on an already-open pool
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    create_tracks_table(pool).await?;
    create_job_queues_table(pool).await?;
    create_job_messages_table(pool).await?;
    create_job_dead_letters_table(pool).await?;

    Ok(())
}

/// Tracks table
///
/// `waveform` holds the preview as a JSON array of numbers once `processed` is set.
pub async fn create_tracks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            id TEXT PRIMARY KEY,
            title TEXT,
            processed INTEGER NOT NULL DEFAULT 0,
            waveform TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Named job queues
pub async fn create_job_queues_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_queues (
            queue_id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Queue messages
///
/// Times are unix milliseconds. A message is receivable once `visible_at`
/// has passed; receiving pushes `visible_at` forward by the visibility timeout.
pub async fn create_job_messages_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_messages (
            message_id TEXT PRIMARY KEY,
            queue_id TEXT NOT NULL REFERENCES job_queues(queue_id) ON DELETE CASCADE,
            attributes TEXT NOT NULL,
            receipt_handle TEXT UNIQUE,
            receive_count INTEGER NOT NULL DEFAULT 0,
            visible_at INTEGER NOT NULL,
            enqueued_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_messages_visible ON job_messages(queue_id, visible_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Messages that exhausted their deliveries
///
/// Kept for inspection and manual replay; nothing receives from this table.
pub async fn create_job_dead_letters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_dead_letters (
            message_id TEXT PRIMARY KEY,
            queue_id TEXT NOT NULL REFERENCES job_queues(queue_id) ON DELETE CASCADE,
            attributes TEXT NOT NULL,
            receive_count INTEGER NOT NULL,
            enqueued_at INTEGER NOT NULL,
            dead_lettered_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
