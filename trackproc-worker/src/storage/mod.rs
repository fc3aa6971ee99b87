//! Object storage
//!
//! Jobs read their source from a temporary object and upload the transcoded
//! output to a permanent one. Both are streamed; no object is buffered whole.

mod local;

pub use local::LocalObjectStore;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::StorageError;

/// Read stream of one object
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write stream of one object
///
/// Bytes written are not visible under the key until [`commit`](Self::commit)
/// returns. Dropping an upload without committing discards it.
#[async_trait]
pub trait ObjectUpload: AsyncWrite + Send + Unpin {
    /// Flush and publish the object
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open a read stream; a missing object is [`StorageError::NotFound`]
    async fn get(&self, key: &str) -> Result<ObjectReader, StorageError>;

    /// Start a staged upload
    async fn put(&self, key: &str) -> Result<Box<dyn ObjectUpload>, StorageError>;

    /// Remove an object; a missing object is [`StorageError::NotFound`]
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Where a job's objects live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    pub temp_prefix: String,
    pub output_prefix: String,
    pub output_format: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self {
            temp_prefix: "tracks/temp".to_string(),
            output_prefix: "tracks".to_string(),
            output_format: "mp3".to_string(),
        }
    }
}

impl KeyLayout {
    /// Key of the uploaded source awaiting processing
    pub fn input_key(&self, temporary_object_key: &str) -> String {
        join_key(&self.temp_prefix, temporary_object_key)
    }

    /// Key of the distributable output for a track
    pub fn output_key(&self, track_id: &str) -> String {
        join_key(
            &self.output_prefix,
            &format!("{}.{}", track_id, self.output_format),
        )
    }
}

fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let name = name.trim_start_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_keys() {
        let layout = KeyLayout::default();
        assert_eq!(layout.input_key("abc123.wav"), "tracks/temp/abc123.wav");
        assert_eq!(layout.output_key("42"), "tracks/42.mp3");
    }

    #[test]
    fn test_join_key_normalizes_slashes() {
        let layout = KeyLayout {
            temp_prefix: "/incoming/".to_string(),
            output_prefix: String::new(),
            output_format: "ogg".to_string(),
        };
        assert_eq!(layout.input_key("/upload"), "incoming/upload");
        assert_eq!(layout.output_key("t1"), "t1.ogg");
    }
}
