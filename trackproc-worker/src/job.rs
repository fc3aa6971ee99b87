//! Processing job carried by a queue message

use std::collections::HashMap;

use crate::error::QueueError;
use crate::queue::QueueMessage;

/// Message attribute naming the uploaded source object
pub const ATTR_TEMPORARY_OBJECT_KEY: &str = "temporaryObjectKey";

/// Message attribute naming the track to update
pub const ATTR_TRACK_ID: &str = "trackId";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Key of the source object, relative to the temporary prefix
    pub temporary_object_key: String,
    pub track_id: String,
    /// Receipt of the delivery that produced this job
    pub receipt_handle: String,
}

impl Job {
    /// Parse a job from a delivered message
    ///
    /// A message missing either attribute can never succeed, so the error is
    /// [`QueueError::Malformed`].
    pub fn from_message(message: &QueueMessage) -> Result<Self, QueueError> {
        let malformed = |reason: String| QueueError::Malformed {
            message_id: message.message_id.clone(),
            reason,
        };

        let temporary_object_key = required_attribute(message, ATTR_TEMPORARY_OBJECT_KEY)
            .ok_or_else(|| malformed(format!("missing {}", ATTR_TEMPORARY_OBJECT_KEY)))?;
        let track_id = required_attribute(message, ATTR_TRACK_ID)
            .ok_or_else(|| malformed(format!("missing {}", ATTR_TRACK_ID)))?;

        if track_id.contains('/') || track_id.contains("..") {
            return Err(malformed(format!("track id {:?} is not a plain name", track_id)));
        }

        Ok(Self {
            temporary_object_key: temporary_object_key.to_string(),
            track_id: track_id.to_string(),
            receipt_handle: message.receipt_handle.clone(),
        })
    }
}

fn required_attribute<'a>(message: &'a QueueMessage, name: &str) -> Option<&'a str> {
    message
        .attribute(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Message attributes for a new job
pub fn job_attributes(temporary_object_key: &str, track_id: &str) -> HashMap<String, String> {
    HashMap::from([
        (ATTR_TEMPORARY_OBJECT_KEY.to_string(), temporary_object_key.to_string()),
        (ATTR_TRACK_ID.to_string(), track_id.to_string()),
    ])
}
