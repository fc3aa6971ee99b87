//! Transcode branches
//!
//! The transcoder is an external collaborator used as a stream filter: bytes
//! in, re-encoded bytes out. A [`TranscodeProcess`] is one running branch.
//! It is a passive pipe: writes to `input` suspend while the process is not
//! reading, and the process blocks while nobody drains `output`.

mod sox;

pub use sox::SoxTranscoder;

use futures::future::BoxFuture;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TranscodeError;

/// Requested output of one branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeTarget {
    pub sample_rate: u32,
    pub channels: u16,
    /// Sample width in bits; `None` keeps the source's width
    pub bits: Option<u16>,
    /// Container/codec name understood by the transcoder (e.g. "wav", "mp3")
    pub format: String,
}

impl TranscodeTarget {
    /// Mono canonical WAV for the waveform decoder
    ///
    /// The width is pinned to 16 bits: wider output would be written as
    /// WAVE_FORMAT_EXTENSIBLE, which is not the 44-byte canonical header.
    pub fn preview(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits: Some(16),
            format: "wav".to_string(),
        }
    }

    /// Stereo compressed output for distribution
    pub fn distribution(sample_rate: u32, format: impl Into<String>) -> Self {
        Self {
            sample_rate,
            channels: 2,
            bits: None,
            format: format.into(),
        }
    }
}

/// Source format hint derived from an object key's extension
///
/// `"uploads/abc.FLAC"` → `Some("flac")`; no extension → `None`.
pub fn source_format_from_key(key: &str) -> Option<String> {
    Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// One running branch
///
/// `exit` resolves once the transcoder has terminated: `Ok` after it flushed
/// all output, `Err` on failure. Dropping `exit` before it resolves tears the
/// branch down.
pub struct TranscodeProcess {
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    pub exit: BoxFuture<'static, Result<(), TranscodeError>>,
}

impl std::fmt::Debug for TranscodeProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeProcess").finish_non_exhaustive()
    }
}

/// Starts transcode branches
pub trait Transcoder: Send + Sync {
    /// Start one branch converting a stream of `input_format` (autodetected
    /// when `None`) into `target`
    fn start(
        &self,
        target: &TranscodeTarget,
        input_format: Option<&str>,
    ) -> Result<TranscodeProcess, TranscodeError>;
}
