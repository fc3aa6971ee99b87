//! Scripted queue, recording job runner and a failing track store

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trackproc_common::Error;
use trackproc_worker::db::TrackStore;
use trackproc_worker::error::{PipelineError, QueueError, Stage};
use trackproc_worker::job::{job_attributes, Job};
use trackproc_worker::pipeline::{JobReport, JobRunner};
use trackproc_worker::queue::{JobQueue, QueueMessage};
use trackproc_worker::waveform::{PreviewResult, PREVIEW_RESOLUTION};

#[derive(Debug, Clone)]
pub enum QueueStep {
    Empty,
    Deliver(QueueMessage),
    Fail,
}

/// Queue answering polls from a script; empty once the script runs out
#[derive(Default)]
pub struct ScriptedQueue {
    script: Mutex<VecDeque<QueueStep>>,
    polls: AtomicUsize,
    deleted: Mutex<Vec<String>>,
}

impl ScriptedQueue {
    pub fn new(steps: impl IntoIterator<Item = QueueStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

/// A well-formed job message
pub fn job_message(n: usize, temporary_object_key: &str, track_id: &str) -> QueueMessage {
    QueueMessage {
        message_id: format!("message-{}", n),
        attributes: job_attributes(temporary_object_key, track_id),
        receipt_handle: format!("receipt-{}", n),
        receive_count: 1,
    }
}

pub fn message_with(n: usize, attributes: HashMap<String, String>) -> QueueMessage {
    QueueMessage {
        message_id: format!("message-{}", n),
        attributes,
        receipt_handle: format!("receipt-{}", n),
        receive_count: 1,
    }
}

#[async_trait]
impl JobQueue for ScriptedQueue {
    async fn receive_one(&self) -> Result<Option<QueueMessage>, QueueError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            None | Some(QueueStep::Empty) => Ok(None),
            Some(QueueStep::Deliver(message)) => Ok(Some(message)),
            Some(QueueStep::Fail) => Err(QueueError::QueueNotFound("scripted outage".to_string())),
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<bool, QueueError> {
        self.deleted.lock().unwrap().push(receipt_handle.to_string());
        Ok(true)
    }
}

/// One observed run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub job: Job,
    pub polls_at_start: usize,
    pub polls_at_end: usize,
}

/// Runner that records jobs and the queue's poll count around each run
pub struct RecordingRunner {
    queue: Arc<ScriptedQueue>,
    duration: Duration,
    fail: bool,
    runs: Mutex<Vec<RunRecord>>,
}

impl RecordingRunner {
    pub fn new(queue: Arc<ScriptedQueue>, duration: Duration, fail: bool) -> Self {
        Self {
            queue,
            duration,
            fail,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobRunner for RecordingRunner {
    async fn run(&self, job: &Job) -> Result<JobReport, PipelineError> {
        let polls_at_start = self.queue.polls();
        tokio::time::sleep(self.duration).await;
        self.runs.lock().unwrap().push(RunRecord {
            job: job.clone(),
            polls_at_start,
            polls_at_end: self.queue.polls(),
        });

        if self.fail {
            return Err(PipelineError::stream(
                Stage::OutputBranch,
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "scripted"),
            ));
        }
        Ok(JobReport {
            preview: PreviewResult::new(vec![0.0; PREVIEW_RESOLUTION]),
            tracks_updated: 1,
            elapsed: self.duration,
        })
    }
}

/// Track store whose first `failures` updates fail, then delegates
pub struct FlakyTrackStore {
    inner: Arc<dyn TrackStore>,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyTrackStore {
    pub fn new(inner: Arc<dyn TrackStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackStore for FlakyTrackStore {
    async fn mark_processed(
        &self,
        track_id: &str,
        preview: &PreviewResult,
    ) -> trackproc_common::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Internal("database is locked".to_string()));
        }
        self.inner.mark_processed(track_id, preview).await
    }
}
