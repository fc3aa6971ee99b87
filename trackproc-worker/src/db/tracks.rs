//! Tracks table access
//!
//! A successful job writes exactly one statement: the track is marked
//! processed and its preview stored as a JSON array of numbers.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::waveform::PreviewResult;
use trackproc_common::{Error, Result};

#[async_trait]
pub trait TrackStore: Send + Sync {
    /// Set `processed` and store the preview; returns rows affected
    ///
    /// An unknown track affects no rows and is not an error.
    async fn mark_processed(&self, track_id: &str, preview: &PreviewResult) -> Result<u64>;
}

/// One row of `tracks`
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub id: String,
    pub title: Option<String>,
    pub processed: bool,
    pub waveform: Option<Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct SqliteTrackStore {
    db: SqlitePool,
}

impl SqliteTrackStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Register a track awaiting processing; false if it already exists
    pub async fn insert_track(&self, id: &str, title: Option<&str>) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO tracks (id, title) VALUES (?, ?)")
            .bind(id)
            .bind(title)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn load_track(&self, id: &str) -> Result<TrackRecord> {
        let row: Option<(String, Option<String>, i64, Option<String>)> = sqlx::query_as(
            "SELECT id, title, processed, waveform FROM tracks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        let (id, title, processed, waveform) =
            row.ok_or_else(|| Error::NotFound(format!("Track not found: {}", id)))?;

        let waveform = waveform
            .map(|json| {
                serde_json::from_str::<Vec<f64>>(&json)
                    .map_err(|e| Error::Internal(format!("Stored waveform is not a number array: {}", e)))
            })
            .transpose()?;

        Ok(TrackRecord {
            id,
            title,
            processed: processed != 0,
            waveform,
        })
    }
}

#[async_trait]
impl TrackStore for SqliteTrackStore {
    async fn mark_processed(&self, track_id: &str, preview: &PreviewResult) -> Result<u64> {
        let waveform = serde_json::to_string(preview)
            .map_err(|e| Error::Internal(format!("Serialize preview failed: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE tracks
            SET processed = 1, waveform = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(waveform)
        .bind(track_id)
        .execute(&self.db)
        .await?;

        let rows = result.rows_affected();
        if rows == 0 {
            warn!(track_id = %track_id, "No track row to mark processed");
        } else {
            debug!(track_id = %track_id, "Track marked processed");
        }
        Ok(rows)
    }
}
