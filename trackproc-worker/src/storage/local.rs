//! Filesystem-backed object store
//!
//! One bucket is a directory under the storage root; keys are relative paths
//! inside it. Uploads are written to a hidden partial file next to the target
//! and renamed into place on commit.

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::{self, File};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ObjectReader, ObjectStore, ObjectUpload};
use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    bucket_dir: PathBuf,
}

impl LocalObjectStore {
    /// Open (creating if needed) `bucket` under `root`
    pub async fn open(root: &Path, bucket: &str) -> Result<Self, StorageError> {
        let bucket_dir = root.join(validate_key(bucket)?);
        fs::create_dir_all(&bucket_dir).await?;
        debug!("Object store bucket at {}", bucket_dir.display());
        Ok(Self { bucket_dir })
    }

    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }

    /// Filesystem path backing `key`
    pub fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.bucket_dir.join(validate_key(key)?))
    }
}

/// Reject keys that would escape the bucket directory
fn validate_key(key: &str) -> Result<PathBuf, StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }

    let path = Path::new(key);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return Err(StorageError::InvalidKey(key.to_string())),
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(relative)
}

fn not_found_or_io(key: &str, e: io::Error) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, key: &str) -> Result<ObjectReader, StorageError> {
        let path = self.object_path(key)?;
        let file = File::open(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        Ok(Box::new(file))
    }

    async fn put(&self, key: &str) -> Result<Box<dyn ObjectUpload>, StorageError> {
        let target = self.object_path(key)?;
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.bucket_dir.clone());
        fs::create_dir_all(&parent).await?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let partial = parent.join(format!(".{}.partial-{}", file_name, Uuid::new_v4()));
        let file = File::create(&partial).await?;

        Ok(Box::new(LocalUpload {
            file,
            partial,
            target,
            committed: false,
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))
    }
}

/// Staged upload into a partial file
struct LocalUpload {
    file: File,
    partial: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl AsyncWrite for LocalUpload {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

#[async_trait]
impl ObjectUpload for LocalUpload {
    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        fs::rename(&self.partial, &self.target).await?;
        self.committed = true;
        debug!("Committed object {}", self.target.display());
        Ok(())
    }
}

impl Drop for LocalUpload {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Runs from task abort as well, so no async here
        if let Err(e) = std::fs::remove_file(&self.partial) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove partial upload {}: {}", self.partial.display(), e);
            }
        }
    }
}
