//! Job queue
//!
//! Messages carry string attributes. A received message stays invisible to
//! other receivers until its visibility timeout lapses; deleting it with its
//! receipt handle acknowledges it.

mod sqlite;

pub use sqlite::SqliteJobQueue;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::QueueError;

/// One received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub attributes: HashMap<String, String>,
    /// Handle for this delivery; invalid once the message is redelivered
    pub receipt_handle: String,
    /// Deliveries so far, including this one
    pub receive_count: u32,
}

impl QueueMessage {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Receive at most one visible message
    async fn receive_one(&self) -> Result<Option<QueueMessage>, QueueError>;

    /// Acknowledge a delivery
    ///
    /// Returns false when the receipt is stale (the message was redelivered
    /// or already deleted).
    async fn delete(&self, receipt_handle: &str) -> Result<bool, QueueError>;
}
