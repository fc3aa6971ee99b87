//! Streaming waveform preview
//!
//! Parses one canonical RIFF/WAVE stream byte by byte and reduces its sample
//! body to a fixed number of normalized peak values. Memory use does not
//! depend on the length of the stream.
//!
//! # Reduction
//! Each of the `resolution` buckets averages `window_fanout` sub-window peaks;
//! each sub-window spans `samples_per_bucket` consecutive samples (see
//! [`BodyGeometry`]). Bucket value = mean peak / max amplitude.

mod decoder;
pub(crate) mod header;

pub use decoder::{BodyGeometry, DecoderState, Phase};
pub use header::{
    Expected, FieldKind, FieldValue, HeaderField, HeaderReader, ParsedHeader, CANONICAL_HEADER,
    CANONICAL_HEADER_LEN,
};

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::FormatError;

/// Number of values in every preview
pub const PREVIEW_RESOLUTION: usize = 64;

/// Sub-windows averaged into one bucket
pub const WINDOW_FANOUT: usize = 8;

/// Read buffer used when draining a stream into the decoder
pub const READ_CHUNK_SIZE: usize = 16 * 1024;

/// How a sub-window's peak is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakMode {
    /// Largest signed sample; an all-negative sub-window reports a negative peak
    #[default]
    Signed,
    /// Largest sample magnitude
    Absolute,
}

impl FromStr for PeakMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signed" => Ok(PeakMode::Signed),
            "absolute" => Ok(PeakMode::Absolute),
            other => Err(format!("unknown peak mode '{}' (expected signed or absolute)", other)),
        }
    }
}

/// Reduction parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewConfig {
    pub resolution: usize,
    pub window_fanout: usize,
    pub peak_mode: PeakMode,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            resolution: PREVIEW_RESOLUTION,
            window_fanout: WINDOW_FANOUT,
            peak_mode: PeakMode::default(),
        }
    }
}

impl PreviewConfig {
    pub fn with_peak_mode(peak_mode: PeakMode) -> Self {
        Self {
            peak_mode,
            ..Self::default()
        }
    }
}

/// Finished preview: exactly `resolution` normalized values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreviewResult(Vec<f64>);

impl PreviewResult {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

/// Decoder fed with byte slices as they arrive
#[derive(Debug, Clone)]
pub struct WaveformDecoder {
    state: DecoderState,
}

impl Default for WaveformDecoder {
    fn default() -> Self {
        Self::new(PreviewConfig::default())
    }
}

impl WaveformDecoder {
    pub fn new(config: PreviewConfig) -> Self {
        Self {
            state: DecoderState::new(config),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<(), FormatError> {
        for &byte in bytes {
            self.state.step(byte)?;
        }
        Ok(())
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn finish(self) -> Result<PreviewResult, FormatError> {
        self.state.finish()
    }
}

/// Failure while draining a reader into the decoder
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Drain `reader` to end of stream and return its preview
pub async fn decode_reader<R>(reader: &mut R, config: PreviewConfig) -> Result<PreviewResult, DecodeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut decoder = WaveformDecoder::new(config);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        decoder.push(&buf[..n])?;
    }

    Ok(decoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_mode_parse() {
        assert_eq!("signed".parse::<PeakMode>(), Ok(PeakMode::Signed));
        assert_eq!(" Absolute ".parse::<PeakMode>(), Ok(PeakMode::Absolute));
        assert!("rms".parse::<PeakMode>().is_err());
        assert_eq!(PeakMode::default(), PeakMode::Signed);
    }

    #[test]
    fn test_preview_serializes_as_plain_array() {
        let preview = PreviewResult::new(vec![0.0, 0.5, 1.0]);
        assert_eq!(serde_json::to_string(&preview).unwrap(), "[0.0,0.5,1.0]");
    }

    #[tokio::test]
    async fn test_decode_reader_drains_async_source() {
        let mut bytes = header::tests::canonical_header(1, 8000, 8, 512);
        bytes.extend(std::iter::repeat(127u8).take(512));
        let mut reader: &[u8] = &bytes;

        let preview = decode_reader(&mut reader, PreviewConfig::default()).await.unwrap();
        assert_eq!(preview.len(), PREVIEW_RESOLUTION);
        assert!(preview.values().iter().all(|v| *v == 1.0));
    }

    #[tokio::test]
    async fn test_decode_reader_reports_format_error() {
        let mut reader: &[u8] = b"OggS\0\0\0\0";
        let result = decode_reader(&mut reader, PreviewConfig::default()).await;
        assert!(matches!(result, Err(DecodeError::Format(_))));
    }
}
