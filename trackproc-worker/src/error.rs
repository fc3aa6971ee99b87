//! Error types for trackproc-worker
//!
//! One enum per collaborator plus [`PipelineError`], the single error a job
//! resolves with. Nothing here is retried in-process; a failed job is left
//! on the queue for redelivery.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error carried by stream and persistence failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Canonical container header failed a constraint check
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Header field {field} is {found:?}, expected {expected:?}")]
    ConstantMismatch {
        field: &'static str,
        expected: String,
        found: String,
    },

    #[error("Unsupported sample width: {0} bits")]
    UnsupportedBitDepth(u32),

    #[error("Inconsistent header: {0}")]
    Inconsistent(String),

    #[error("Stream ended inside header field {field}")]
    TruncatedHeader { field: &'static str },
}

/// Object storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Queue errors
///
/// Poll failures are transient: the consumer logs them and tries again on
/// the next tick.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Message attributes could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Malformed message {message_id}: {reason}")]
    Malformed { message_id: String, reason: String },
}

/// External transcoder errors
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Failed to launch transcoder {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcoder {program} exited with {status}: {stderr}")]
    Exited {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Transcoder {0} pipe was not captured")]
    MissingPipe(&'static str),

    #[error("Transcoder IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Member of a job's stream set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Read stream of the temporary object
    Input,
    /// Transcode branch feeding the waveform decoder
    PreviewBranch,
    /// Transcode branch feeding the upload
    OutputBranch,
    /// Waveform decoder
    Decoder,
    /// Write stream to permanent storage
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Input => "input",
            Stage::PreviewBranch => "preview branch",
            Stage::OutputBranch => "output branch",
            Stage::Decoder => "decoder",
            Stage::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Error a job resolves with
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The preview branch did not produce a canonical container
    #[error("Waveform format error: {0}")]
    Format(#[from] FormatError),

    /// I/O failure on any member of the stream set
    #[error("Stream error in {stage}: {source}")]
    Stream {
        stage: Stage,
        #[source]
        source: BoxError,
    },

    /// Cleanup or database update failed after both branches succeeded
    #[error("Persistence failed during {operation}: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("Job exceeded deadline of {0:?}")]
    Timeout(Duration),

    #[error("Internal pipeline error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn stream(stage: Stage, source: impl Into<BoxError>) -> Self {
        PipelineError::Stream {
            stage,
            source: source.into(),
        }
    }

    pub fn persistence(operation: &'static str, source: impl Into<BoxError>) -> Self {
        PipelineError::Persistence {
            operation,
            source: source.into(),
        }
    }

    /// Stage the failure is attributed to, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stream { stage, .. } => Some(*stage),
            PipelineError::Format(_) => Some(Stage::Decoder),
            _ => None,
        }
    }
}
