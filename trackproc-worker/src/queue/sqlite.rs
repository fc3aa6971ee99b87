//! SQLite-backed job queue
//!
//! Queues and messages live in the `job_queues` / `job_messages` tables.
//! Receiving is one `UPDATE ... RETURNING` statement, so two workers sharing a
//! database never receive the same delivery.
//!
//! With a delivery limit, a message that is visible again after its last
//! allowed delivery moves to `job_dead_letters` instead of being received.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{JobQueue, QueueMessage};
use crate::error::QueueError;

#[derive(Debug, Clone)]
pub struct SqliteJobQueue {
    db: SqlitePool,
    queue_id: String,
    name: String,
    visibility_timeout: Duration,
    max_receive_count: Option<u32>,
}

impl SqliteJobQueue {
    /// Look up a queue by name, once at startup
    ///
    /// With `create_if_missing` an unknown queue is created; otherwise it is
    /// [`QueueError::QueueNotFound`].
    pub async fn resolve(
        db: SqlitePool,
        name: &str,
        visibility_timeout: Duration,
        create_if_missing: bool,
    ) -> Result<Self, QueueError> {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT queue_id FROM job_queues WHERE name = ?")
                .bind(name)
                .fetch_optional(&db)
                .await?;

        let queue_id = match existing {
            Some((queue_id,)) => queue_id,
            None if create_if_missing => {
                sqlx::query("INSERT OR IGNORE INTO job_queues (queue_id, name) VALUES (?, ?)")
                    .bind(Uuid::new_v4().to_string())
                    .bind(name)
                    .execute(&db)
                    .await?;

                let (queue_id,): (String,) =
                    sqlx::query_as("SELECT queue_id FROM job_queues WHERE name = ?")
                        .bind(name)
                        .fetch_one(&db)
                        .await?;
                info!(queue = %name, "Created job queue");
                queue_id
            }
            None => return Err(QueueError::QueueNotFound(name.to_string())),
        };

        debug!(queue = %name, queue_id = %queue_id, "Resolved job queue");
        Ok(Self {
            db,
            queue_id,
            name: name.to_string(),
            visibility_timeout,
            max_receive_count: None,
        })
    }

    /// Limit deliveries per message; `None` redelivers forever
    pub fn with_max_receive_count(mut self, max_receive_count: Option<u32>) -> Self {
        self.max_receive_count = max_receive_count.filter(|&max| max > 0);
        self
    }

    pub fn max_receive_count(&self) -> Option<u32> {
        self.max_receive_count
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    /// Enqueue a message; returns its id
    pub async fn send(&self, attributes: &HashMap<String, String>) -> Result<String, QueueError> {
        let message_id = Uuid::new_v4().to_string();
        let encoded = serde_json::to_string(attributes)?;
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO job_messages (message_id, queue_id, attributes, visible_at, enqueued_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message_id)
        .bind(&self.queue_id)
        .bind(encoded)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;

        debug!(queue = %self.name, message_id = %message_id, "Message sent");
        Ok(message_id)
    }

    /// Messages not yet deleted, visible or in flight
    pub async fn pending_count(&self) -> Result<i64, QueueError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_messages WHERE queue_id = ?")
            .bind(&self.queue_id)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Messages moved aside after exhausting their deliveries
    pub async fn dead_letter_count(&self) -> Result<i64, QueueError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM job_dead_letters WHERE queue_id = ?")
                .bind(&self.queue_id)
                .fetch_one(&self.db)
                .await?;
        Ok(count)
    }

    /// Move visible messages that already had `max` deliveries to the
    /// dead-letter table; returns how many moved
    async fn dead_letter_exhausted(&self, now: i64, max: u32) -> Result<usize, QueueError> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO job_dead_letters
                (message_id, queue_id, attributes, receive_count, enqueued_at, dead_lettered_at)
            SELECT message_id, queue_id, attributes, receive_count, enqueued_at, ?
            FROM job_messages
            WHERE queue_id = ? AND visible_at <= ? AND receive_count >= ?
            "#,
        )
        .bind(now)
        .bind(&self.queue_id)
        .bind(now)
        .bind(i64::from(max))
        .execute(&mut *tx)
        .await?;

        let moved = sqlx::query(
            r#"
            DELETE FROM job_messages
            WHERE queue_id = ? AND visible_at <= ? AND receive_count >= ?
            RETURNING message_id, receive_count
            "#,
        )
        .bind(&self.queue_id)
        .bind(now)
        .bind(i64::from(max))
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        for row in &moved {
            let message_id: String = row.try_get("message_id")?;
            let receive_count: i64 = row.try_get("receive_count")?;
            warn!(
                queue = %self.name,
                message_id = %message_id,
                receive_count,
                "Message exhausted its deliveries, moved to dead letters"
            );
        }
        Ok(moved.len())
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn receive_one(&self) -> Result<Option<QueueMessage>, QueueError> {
        let now = Utc::now().timestamp_millis();
        let hidden_until = now.saturating_add(self.visibility_timeout.as_millis() as i64);
        let receipt_handle = Uuid::new_v4().to_string();

        if let Some(max) = self.max_receive_count {
            self.dead_letter_exhausted(now, max).await?;
        }

        let row = sqlx::query(
            r#"
            UPDATE job_messages
            SET receipt_handle = ?, receive_count = receive_count + 1, visible_at = ?
            WHERE message_id = (
                SELECT message_id FROM job_messages
                WHERE queue_id = ? AND visible_at <= ?
                ORDER BY enqueued_at, rowid
                LIMIT 1
            )
            RETURNING message_id, attributes, receipt_handle, receive_count
            "#,
        )
        .bind(&receipt_handle)
        .bind(hidden_until)
        .bind(&self.queue_id)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let message_id: String = row.try_get("message_id")?;
        let encoded: String = row.try_get("attributes")?;
        let receive_count: i64 = row.try_get("receive_count")?;

        // Undecodable attributes are delivered empty so the consumer rejects
        // the message instead of it cycling through redelivery
        let attributes: HashMap<String, String> = serde_json::from_str(&encoded)
            .unwrap_or_else(|e| {
                warn!(message_id = %message_id, "Message attributes are not a string map: {}", e);
                HashMap::new()
            });

        Ok(Some(QueueMessage {
            message_id,
            attributes,
            receipt_handle: row.try_get("receipt_handle")?,
            receive_count: u32::try_from(receive_count).unwrap_or(u32::MAX),
        }))
    }

    async fn delete(&self, receipt_handle: &str) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM job_messages WHERE queue_id = ? AND receipt_handle = ?")
            .bind(&self.queue_id)
            .bind(receipt_handle)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
