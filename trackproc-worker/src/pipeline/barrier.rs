//! Join/error barrier for one job
//!
//! Collects terminal events from the stream set and yields at most one
//! verdict. The first failure wins; success needs both the decoder and the
//! upload to have finished, in either order. A preview-only barrier, used
//! when the output was already published, needs the decoder alone.

use tracing::debug;

use crate::error::PipelineError;
use crate::waveform::PreviewResult;

/// Terminal event reported by a stage
#[derive(Debug)]
pub enum StageEvent {
    /// Preview branch exited cleanly and the decoder produced its result
    PreviewFinished(PreviewResult),
    /// Output branch exited cleanly and the upload was committed
    UploadFinished,
    Failed(PipelineError),
}

#[derive(Debug)]
pub enum Verdict {
    Succeeded(PreviewResult),
    Failed(PipelineError),
}

#[derive(Debug)]
pub struct JoinBarrier {
    preview: Option<PreviewResult>,
    upload_finished: bool,
    needs_upload: bool,
    settled: bool,
}

impl Default for JoinBarrier {
    fn default() -> Self {
        Self {
            preview: None,
            upload_finished: false,
            needs_upload: true,
            settled: false,
        }
    }
}

impl JoinBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Barrier for a job with no upload stage
    pub fn preview_only() -> Self {
        Self {
            needs_upload: false,
            ..Self::default()
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Whether the upload committed before the verdict
    pub fn upload_finished(&self) -> bool {
        self.upload_finished
    }

    /// Record one event; returns the verdict the first time one is reached
    pub fn record(&mut self, event: StageEvent) -> Option<Verdict> {
        if self.settled {
            debug!("Ignoring stage event after verdict: {:?}", event);
            return None;
        }

        match event {
            StageEvent::PreviewFinished(preview) => self.preview = Some(preview),
            StageEvent::UploadFinished => self.upload_finished = true,
            StageEvent::Failed(error) => {
                self.settled = true;
                return Some(Verdict::Failed(error));
            }
        }

        if (self.upload_finished || !self.needs_upload) && self.preview.is_some() {
            self.settled = true;
            return self.preview.take().map(Verdict::Succeeded);
        }
        None
    }

    /// All stages are gone; an unsettled barrier can no longer succeed
    pub fn close(&mut self) -> Option<Verdict> {
        if self.settled {
            return None;
        }
        self.settled = true;

        let upload_done = self.upload_finished || !self.needs_upload;
        let missing = match (self.preview.is_some(), upload_done) {
            (false, false) => "preview and upload",
            (false, true) => "preview",
            _ => "upload",
        };
        Some(Verdict::Failed(PipelineError::Internal(format!(
            "stages ended without reporting {}",
            missing
        ))))
    }
}
