//! Object store and database on temporary storage

use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use trackproc_common::db::init_database;
use trackproc_worker::db::{SqliteTrackStore, TrackStore};
use trackproc_worker::pipeline::{PipelineCoordinator, PipelineSettings};
use trackproc_worker::storage::{LocalObjectStore, ObjectStore, ObjectUpload};
use trackproc_worker::transcode::Transcoder;

pub struct TestEnv {
    pub dir: TempDir,
    pub store: Arc<LocalObjectStore>,
    pub pool: SqlitePool,
    pub tracks: Arc<SqliteTrackStore>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::open(&dir.path().join("storage"), "bucket")
            .await
            .unwrap();
        let pool = init_database(&dir.path().join("trackproc.db")).await.unwrap();
        let tracks = SqliteTrackStore::new(pool.clone());

        Self {
            dir,
            store: Arc::new(store),
            pool,
            tracks: Arc::new(tracks),
        }
    }

    pub async fn put_object(&self, key: &str, bytes: &[u8]) {
        let mut upload = self.store.put(key).await.unwrap();
        upload.write_all(bytes).await.unwrap();
        upload.commit().await.unwrap();
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        self.store.object_path(key).unwrap()
    }

    pub fn object_exists(&self, key: &str) -> bool {
        self.object_path(key).exists()
    }

    pub fn read_object(&self, key: &str) -> Vec<u8> {
        std::fs::read(self.object_path(key)).unwrap()
    }

    /// Leftover partial uploads anywhere in the bucket
    pub fn partial_uploads(&self) -> Vec<PathBuf> {
        fn walk(dir: &std::path::Path, found: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, found);
                } else if entry.file_name().to_string_lossy().contains(".partial-") {
                    found.push(path);
                }
            }
        }

        let mut found = Vec::new();
        walk(self.store.bucket_dir(), &mut found);
        found
    }

    pub fn coordinator(
        &self,
        transcoder: Arc<dyn Transcoder>,
        job_timeout: Option<Duration>,
    ) -> PipelineCoordinator {
        self.coordinator_with_tracks(transcoder, self.tracks.clone(), job_timeout)
    }

    pub fn coordinator_with_tracks(
        &self,
        transcoder: Arc<dyn Transcoder>,
        tracks: Arc<dyn TrackStore>,
        job_timeout: Option<Duration>,
    ) -> PipelineCoordinator {
        PipelineCoordinator::new(
            self.store.clone(),
            transcoder,
            tracks,
            PipelineSettings {
                job_timeout,
                ..PipelineSettings::default()
            },
        )
    }
}
