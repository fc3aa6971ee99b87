//! Dual-branch transcode pipeline
//!
//! One job = one input stream fanned into two transcode branches:
//! - **Preview**: mono canonical WAV, drained into a [`WaveformDecoder`](crate::waveform::WaveformDecoder)
//! - **Output**: stereo distribution format, streamed into the upload
//!
//! All stages run as tasks of one `JoinSet` and report terminal events to a
//! [`JoinBarrier`]. The first failure tears the whole set down; success needs
//! both the preview and the committed upload. Only then is the temporary
//! object deleted and the track marked processed.
//!
//! A job whose temporary object is gone but whose output is published (a
//! redelivery after the track update failed) rebuilds the preview from the
//! published output and persists it.

mod barrier;
mod stages;

pub use barrier::{JoinBarrier, StageEvent, Verdict};

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::db::TrackStore;
use crate::error::{PipelineError, Stage, StorageError};
use crate::job::Job;
use crate::storage::{KeyLayout, ObjectReader, ObjectStore};
use crate::transcode::{source_format_from_key, TranscodeTarget, Transcoder};
use crate::waveform::{PreviewConfig, PreviewResult};

/// Default per-job deadline
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(240);

/// Runs one job to completion
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &Job) -> Result<JobReport, PipelineError>;
}

/// Outcome of a successful job
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub preview: PreviewResult,
    /// Track rows updated; 0 when the track no longer exists
    pub tracks_updated: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub layout: KeyLayout,
    /// Output rate of both branches
    pub sample_rate: u32,
    pub preview: PreviewConfig,
    /// Deadline for the stream set; `None` waits indefinitely
    pub job_timeout: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            layout: KeyLayout::default(),
            sample_rate: 44100,
            preview: PreviewConfig::default(),
            job_timeout: Some(DEFAULT_JOB_TIMEOUT),
        }
    }
}

pub struct PipelineCoordinator {
    store: Arc<dyn ObjectStore>,
    transcoder: Arc<dyn Transcoder>,
    tracks: Arc<dyn TrackStore>,
    settings: PipelineSettings,
}

impl PipelineCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transcoder: Arc<dyn Transcoder>,
        tracks: Arc<dyn TrackStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            transcoder,
            tracks,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Start every stage of `job` and wait for the barrier's verdict
    ///
    /// Whatever the verdict, no stage task outlives this call.
    async fn process_streams(&self, job: &Job) -> Result<PreviewResult, PipelineError> {
        let layout = &self.settings.layout;
        let input_key = layout.input_key(&job.temporary_object_key);
        let output_key = layout.output_key(&job.track_id);
        let source_format = source_format_from_key(&job.temporary_object_key);

        let input = match self.store.get(&input_key).await {
            Ok(input) => input,
            Err(StorageError::NotFound(key)) => {
                // A redelivery after a persistence failure finds the source
                // deleted and the output already published
                return match self.store.get(&output_key).await {
                    Ok(published) => {
                        info!(
                            track_id = %job.track_id,
                            key = %output_key,
                            "Temporary object gone, rebuilding preview from published output"
                        );
                        self.rebuild_preview(published, &output_key).await
                    }
                    Err(_) => Err(PipelineError::stream(
                        Stage::Input,
                        StorageError::NotFound(key),
                    )),
                };
            }
            Err(e) => return Err(PipelineError::stream(Stage::Input, e)),
        };
        let upload = self
            .store
            .put(&output_key)
            .await
            .map_err(|e| PipelineError::stream(Stage::Upload, e))?;

        let preview_branch = self
            .transcoder
            .start(
                &TranscodeTarget::preview(self.settings.sample_rate),
                source_format.as_deref(),
            )
            .map_err(|e| PipelineError::stream(Stage::PreviewBranch, e))?;
        let output_branch = self
            .transcoder
            .start(
                &TranscodeTarget::distribution(
                    self.settings.sample_rate,
                    layout.output_format.clone(),
                ),
                source_format.as_deref(),
            )
            .map_err(|e| PipelineError::stream(Stage::OutputBranch, e))?;

        debug!(
            input = %input_key,
            output = %output_key,
            source_format = ?source_format,
            "Stages starting"
        );

        let (events_tx, mut events_rx) = mpsc::channel::<StageEvent>(8);
        let mut tasks = JoinSet::new();

        spawn_stage(
            &mut tasks,
            &events_tx,
            Stage::Input,
            stages::tee_input(input, preview_branch.input, output_branch.input),
            |_bytes| None,
        );
        spawn_stage(
            &mut tasks,
            &events_tx,
            Stage::Decoder,
            stages::run_preview(
                preview_branch.output,
                preview_branch.exit,
                self.settings.preview,
            ),
            |preview| Some(StageEvent::PreviewFinished(preview)),
        );
        spawn_stage(
            &mut tasks,
            &events_tx,
            Stage::Upload,
            stages::run_upload(output_branch.output, output_branch.exit, upload),
            |_bytes| Some(StageEvent::UploadFinished),
        );
        drop(events_tx);

        let mut barrier = JoinBarrier::new();
        let verdict = self.settle(&mut barrier, &mut events_rx, &mut tasks).await;

        match verdict {
            Verdict::Succeeded(preview) => Ok(preview),
            Verdict::Failed(error) => {
                if barrier.upload_finished() {
                    self.discard_output(&output_key).await;
                }
                Err(error)
            }
        }
    }

    /// Decode the preview from an already published output
    ///
    /// Only the preview branch runs; the output is never touched, whatever
    /// the verdict.
    async fn rebuild_preview(
        &self,
        published: ObjectReader,
        output_key: &str,
    ) -> Result<PreviewResult, PipelineError> {
        let source_format = source_format_from_key(output_key);
        let preview_branch = self
            .transcoder
            .start(
                &TranscodeTarget::preview(self.settings.sample_rate),
                source_format.as_deref(),
            )
            .map_err(|e| PipelineError::stream(Stage::PreviewBranch, e))?;

        let (events_tx, mut events_rx) = mpsc::channel::<StageEvent>(8);
        let mut tasks = JoinSet::new();

        spawn_stage(
            &mut tasks,
            &events_tx,
            Stage::Input,
            stages::feed_preview(published, preview_branch.input),
            |_bytes| None,
        );
        spawn_stage(
            &mut tasks,
            &events_tx,
            Stage::Decoder,
            stages::run_preview(
                preview_branch.output,
                preview_branch.exit,
                self.settings.preview,
            ),
            |preview| Some(StageEvent::PreviewFinished(preview)),
        );
        drop(events_tx);

        let mut barrier = JoinBarrier::preview_only();
        match self.settle(&mut barrier, &mut events_rx, &mut tasks).await {
            Verdict::Succeeded(preview) => Ok(preview),
            Verdict::Failed(error) => Err(error),
        }
    }

    /// Wait for a verdict within the job deadline, then stop every stage
    async fn settle(
        &self,
        barrier: &mut JoinBarrier,
        events: &mut mpsc::Receiver<StageEvent>,
        tasks: &mut JoinSet<()>,
    ) -> Verdict {
        let verdict = match self.settings.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, await_verdict(barrier, events)).await {
                Ok(verdict) => verdict,
                Err(_) => Verdict::Failed(PipelineError::Timeout(limit)),
            },
            None => await_verdict(barrier, events).await,
        };

        // Anything still running after the verdict is either failed work or
        // surplus; aborting drops branch processes and uncommitted uploads
        tasks.shutdown().await;
        verdict
    }

    /// Remove an output that was committed before the job failed
    async fn discard_output(&self, output_key: &str) {
        match self.store.delete(output_key).await {
            Ok(()) => debug!(key = %output_key, "Discarded output of failed job"),
            Err(StorageError::NotFound(_)) => {}
            Err(e) => warn!(key = %output_key, "Failed to discard output of failed job: {}", e),
        }
    }

    /// Delete the temporary object, then persist the preview
    async fn complete(&self, job: &Job, preview: &PreviewResult) -> Result<u64, PipelineError> {
        let input_key = self.settings.layout.input_key(&job.temporary_object_key);

        match self.store.delete(&input_key).await {
            Ok(()) => debug!(key = %input_key, "Temporary object deleted"),
            Err(StorageError::NotFound(_)) => {
                debug!(key = %input_key, "Temporary object already gone")
            }
            Err(e) => return Err(PipelineError::persistence("delete temporary object", e)),
        }

        self.tracks
            .mark_processed(&job.track_id, preview)
            .await
            .map_err(|e| PipelineError::persistence("update track", e))
    }
}

#[async_trait]
impl JobRunner for PipelineCoordinator {
    async fn run(&self, job: &Job) -> Result<JobReport, PipelineError> {
        let started = Instant::now();
        info!(
            track_id = %job.track_id,
            key = %job.temporary_object_key,
            "Job started"
        );

        let preview = match self.process_streams(job).await {
            Ok(preview) => preview,
            Err(e) => {
                warn!(
                    track_id = %job.track_id,
                    stage = ?e.stage(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job failed: {}",
                    e
                );
                return Err(e);
            }
        };

        let tracks_updated = self.complete(job, &preview).await?;
        let elapsed = started.elapsed();
        info!(
            track_id = %job.track_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job completed"
        );

        Ok(JobReport {
            preview,
            tracks_updated,
            elapsed,
        })
    }
}

/// Spawn one stage task that reports its terminal event
///
/// A stage whose success is not a barrier input returns `None` from
/// `on_success`. A panic counts as a failure of that stage.
fn spawn_stage<F, T>(
    set: &mut JoinSet<()>,
    events: &mpsc::Sender<StageEvent>,
    stage: Stage,
    work: F,
    on_success: fn(T) -> Option<StageEvent>,
) where
    F: std::future::Future<Output = Result<T, PipelineError>> + Send + 'static,
    T: Send + 'static,
{
    let events = events.clone();
    set.spawn(async move {
        let event = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(value)) => on_success(value),
            Ok(Err(error)) => Some(StageEvent::Failed(error)),
            Err(_) => Some(StageEvent::Failed(PipelineError::Internal(format!(
                "{} stage panicked",
                stage
            )))),
        };
        if let Some(event) = event {
            // The coordinator stops listening once it has a verdict
            let _ = events.send(event).await;
        }
    });
}

/// Feed stage events into the barrier until it settles
async fn await_verdict(
    barrier: &mut JoinBarrier,
    events: &mut mpsc::Receiver<StageEvent>,
) -> Verdict {
    while let Some(event) = events.recv().await {
        if let Some(verdict) = barrier.record(event) {
            return verdict;
        }
    }
    barrier.close().unwrap_or_else(|| {
        Verdict::Failed(PipelineError::Internal(
            "barrier settled without a verdict".to_string(),
        ))
    })
}
