//! trackproc-worker - track processing worker
//!
//! Turns an uploaded audio object into a distributable encoding plus a
//! fixed-length waveform preview, in one streaming pass:
//!
//! ```text
//! queue ─▶ JobConsumer ─▶ PipelineCoordinator
//!                             │ input object
//!                             ├─▶ preview branch ─▶ WaveformDecoder ─┐
//!                             └─▶ output branch  ─▶ upload ──────────┤
//!                                                        JoinBarrier ┘
//!                                   ─▶ delete temp object ─▶ mark track processed
//! ```

pub mod config;
pub mod consumer;
pub mod db;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod transcode;
pub mod waveform;

pub use consumer::{ConsumerState, JobConsumer, PollOutcome};
pub use error::{PipelineError, Stage};
pub use job::Job;
pub use pipeline::{JobRunner, PipelineCoordinator, PipelineSettings};
pub use waveform::{PreviewConfig, PreviewResult, WaveformDecoder};
