//! Waveform decoder state machine
//!
//! `Header` → `Body`, driven one byte at a time by [`DecoderState::step`].
//! Memory use is fixed by the preview configuration, never by stream length.

use super::header::{HeaderReader, ParsedHeader};
use super::{PeakMode, PreviewConfig, PreviewResult};
use crate::error::FormatError;

/// Decoder phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Header,
    Body,
}

/// Constants derived from the header once it is complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyGeometry {
    /// Bytes assembled into one sample
    pub bytes_per_channel_sample: usize,
    /// Samples per sub-window (never 0)
    pub samples_per_bucket: u64,
    /// Largest positive value at this bit depth
    pub max_amplitude: i64,
    /// 2^bitsPerSample
    pub twos_complement_modulus: i64,
}

impl BodyGeometry {
    pub fn from_header(header: &ParsedHeader, config: &PreviewConfig) -> Self {
        let samples_per_bucket = u64::from(header.data_length)
            / u64::from(header.block_align)
            / u64::from(header.num_channels)
            / config.resolution as u64
            / config.window_fanout as u64;

        Self {
            bytes_per_channel_sample: header.bytes_per_channel_sample(),
            // A body too short to give each sub-window a sample still yields buckets
            samples_per_bucket: samples_per_bucket.max(1),
            max_amplitude: (1i64 << (header.bits_per_sample - 1)) - 1,
            twos_complement_modulus: 1i64 << header.bits_per_sample,
        }
    }

    /// Reinterpret an assembled little-endian sample as signed
    pub fn to_signed(&self, raw: u64) -> i64 {
        let value = raw as i64;
        if value > self.max_amplitude {
            value - self.twos_complement_modulus
        } else {
            value
        }
    }
}

/// Complete decoder state for one stream
#[derive(Debug, Clone)]
pub struct DecoderState {
    config: PreviewConfig,
    phase: Phase,
    header: HeaderReader,
    parsed: Option<ParsedHeader>,
    geometry: Option<BodyGeometry>,
    sample: u64,
    sample_byte: usize,
    window_peak: Option<i64>,
    sample_in_window: u64,
    window_index: usize,
    window_peaks: Vec<i64>,
    buckets: Vec<f64>,
}

impl DecoderState {
    pub fn new(config: PreviewConfig) -> Self {
        let config = PreviewConfig {
            resolution: config.resolution.max(1),
            window_fanout: config.window_fanout.max(1),
            ..config
        };
        Self {
            phase: Phase::Header,
            header: HeaderReader::new(),
            parsed: None,
            geometry: None,
            sample: 0,
            sample_byte: 0,
            window_peak: None,
            sample_in_window: 0,
            window_index: 0,
            window_peaks: vec![0; config.window_fanout],
            buckets: Vec::with_capacity(config.resolution),
            config,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn header(&self) -> Option<&ParsedHeader> {
        self.parsed.as_ref()
    }

    pub fn geometry(&self) -> Option<&BodyGeometry> {
        self.geometry.as_ref()
    }

    /// Buckets completed so far
    pub fn buckets_filled(&self) -> usize {
        self.buckets.len()
    }

    /// Advance the state machine by one byte
    pub fn step(&mut self, byte: u8) -> Result<(), FormatError> {
        match (self.phase, self.geometry) {
            (Phase::Body, Some(geometry)) => {
                self.step_body(byte, &geometry);
                Ok(())
            }
            _ => self.step_header(byte),
        }
    }

    fn step_header(&mut self, byte: u8) -> Result<(), FormatError> {
        if let Some(header) = self.header.push(byte)? {
            self.geometry = Some(BodyGeometry::from_header(&header, &self.config));
            self.parsed = Some(header);
            self.phase = Phase::Body;
        }
        Ok(())
    }

    fn step_body(&mut self, byte: u8, geometry: &BodyGeometry) {
        self.sample |= u64::from(byte) << (8 * self.sample_byte);
        self.sample_byte += 1;
        if self.sample_byte < geometry.bytes_per_channel_sample {
            return;
        }

        let value = geometry.to_signed(self.sample);
        self.sample = 0;
        self.sample_byte = 0;

        if self.buckets.len() >= self.config.resolution {
            return;
        }

        let level = match self.config.peak_mode {
            PeakMode::Signed => value,
            PeakMode::Absolute => value.abs(),
        };
        self.window_peak = Some(self.window_peak.map_or(level, |peak| peak.max(level)));

        self.sample_in_window += 1;
        if self.sample_in_window < geometry.samples_per_bucket {
            return;
        }

        self.window_peaks[self.window_index] = self.window_peak.take().unwrap_or_default();
        self.sample_in_window = 0;
        self.window_index += 1;

        if self.window_index == self.config.window_fanout {
            let sum: i64 = self.window_peaks.iter().sum();
            let average = sum as f64 / self.config.window_fanout as f64;
            self.buckets.push(average / geometry.max_amplitude as f64);
            self.window_index = 0;
        }
    }

    /// End of stream
    ///
    /// Zero-fills unfinished buckets. Ending before the header is complete is
    /// a format error.
    pub fn finish(self) -> Result<PreviewResult, FormatError> {
        if self.phase == Phase::Header {
            let field = self
                .header
                .current_field()
                .map(|f| f.name)
                .unwrap_or(super::header::DATA_LENGTH);
            return Err(FormatError::TruncatedHeader { field });
        }

        let mut buckets = self.buckets;
        buckets.resize(self.config.resolution, 0.0);
        Ok(PreviewResult::new(buckets))
    }
}
