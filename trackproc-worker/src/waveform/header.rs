//! Canonical RIFF/WAVE header schema and byte-at-a-time reader

use std::collections::HashMap;

use crate::error::FormatError;

/// How a header field's bytes are assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Characters appended in arrival order
    Text,
    /// Little-endian unsigned integer
    Numeric,
}

/// Value a field must carry for the container to be well-formed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Text(&'static str),
    Numeric(u32),
}

/// One entry of the fixed header layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderField {
    pub name: &'static str,
    pub width: usize,
    pub kind: FieldKind,
    pub expected: Option<Expected>,
}

const fn text(name: &'static str, expected: &'static str) -> HeaderField {
    HeaderField {
        name,
        width: 4,
        kind: FieldKind::Text,
        expected: Some(Expected::Text(expected)),
    }
}

const fn numeric(name: &'static str, width: usize, expected: Option<u32>) -> HeaderField {
    let expected = match expected {
        Some(value) => Some(Expected::Numeric(value)),
        None => None,
    };
    HeaderField {
        name,
        width,
        kind: FieldKind::Numeric,
        expected,
    }
}

pub const CHUNK_ID: &str = "chunkId";
pub const TOTAL_SIZE: &str = "totalSize";
pub const FORMAT: &str = "format";
pub const FORMAT_SECTION_ID: &str = "formatSectionId";
pub const FORMAT_SECTION_SIZE: &str = "formatSectionSize";
pub const AUDIO_FORMAT: &str = "audioFormat";
pub const NUM_CHANNELS: &str = "numChannels";
pub const SAMPLE_RATE: &str = "sampleRate";
pub const BYTE_RATE: &str = "byteRate";
pub const BLOCK_ALIGN: &str = "blockAlign";
pub const BITS_PER_SAMPLE: &str = "bitsPerSample";
pub const DATA_SECTION_ID: &str = "dataSectionId";
pub const DATA_LENGTH: &str = "dataLength";

/// Field layout of the 44-byte canonical header, in stream order
pub const CANONICAL_HEADER: [HeaderField; 13] = [
    text(CHUNK_ID, "RIFF"),
    numeric(TOTAL_SIZE, 4, None),
    text(FORMAT, "WAVE"),
    text(FORMAT_SECTION_ID, "fmt "),
    // Any other fmt size moves the data chunk and breaks the fixed layout
    numeric(FORMAT_SECTION_SIZE, 4, Some(16)),
    numeric(AUDIO_FORMAT, 2, Some(1)),
    numeric(NUM_CHANNELS, 2, None),
    numeric(SAMPLE_RATE, 4, None),
    numeric(BYTE_RATE, 4, None),
    numeric(BLOCK_ALIGN, 2, None),
    numeric(BITS_PER_SAMPLE, 2, None),
    text(DATA_SECTION_ID, "data"),
    numeric(DATA_LENGTH, 4, None),
];

/// Total byte length of [`CANONICAL_HEADER`]
pub const CANONICAL_HEADER_LEN: usize = 44;

/// Decoded value of one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Numeric(u32),
}

impl FieldValue {
    fn empty(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Text => FieldValue::Text(String::new()),
            FieldKind::Numeric => FieldValue::Numeric(0),
        }
    }

    fn matches(&self, expected: Expected) -> bool {
        match (self, expected) {
            (FieldValue::Text(found), Expected::Text(want)) => found == want,
            (FieldValue::Numeric(found), Expected::Numeric(want)) => *found == want,
            _ => false,
        }
    }
}

fn describe(expected: Expected) -> String {
    match expected {
        Expected::Text(s) => s.to_string(),
        Expected::Numeric(n) => n.to_string(),
    }
}

fn describe_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) => s.clone(),
        FieldValue::Numeric(n) => n.to_string(),
    }
}

/// Accumulates header bytes field by field
///
/// Fields close strictly in schema order once their declared width has been
/// consumed. A field with an expected constant is checked the moment it
/// closes, so a foreign stream fails within its first four bytes.
#[derive(Debug, Clone)]
pub struct HeaderReader {
    field: usize,
    offset: usize,
    current: FieldValue,
    fields: Vec<(&'static str, FieldValue)>,
}

impl Default for HeaderReader {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderReader {
    pub fn new() -> Self {
        Self {
            field: 0,
            offset: 0,
            current: FieldValue::empty(CANONICAL_HEADER[0].kind),
            fields: Vec::with_capacity(CANONICAL_HEADER.len()),
        }
    }

    /// Field the next byte belongs to, `None` once every field is closed
    pub fn current_field(&self) -> Option<&'static HeaderField> {
        CANONICAL_HEADER.get(self.field)
    }

    /// Consume one byte
    ///
    /// Returns the parsed header when the byte closes the last field.
    pub fn push(&mut self, byte: u8) -> Result<Option<ParsedHeader>, FormatError> {
        let Some(spec) = self.current_field() else {
            return Err(FormatError::Inconsistent(
                "header bytes received after header was complete".to_string(),
            ));
        };

        match &mut self.current {
            FieldValue::Text(s) => s.push(char::from(byte)),
            FieldValue::Numeric(n) => *n |= u32::from(byte) << (8 * self.offset),
        }
        self.offset += 1;

        if self.offset < spec.width {
            return Ok(None);
        }

        if let Some(expected) = spec.expected {
            if !self.current.matches(expected) {
                return Err(FormatError::ConstantMismatch {
                    field: spec.name,
                    expected: describe(expected),
                    found: describe_value(&self.current),
                });
            }
        }

        self.field += 1;
        self.offset = 0;
        let next_kind = self
            .current_field()
            .map(|f| f.kind)
            .unwrap_or(FieldKind::Numeric);
        let closed = std::mem::replace(&mut self.current, FieldValue::empty(next_kind));
        self.fields.push((spec.name, closed));

        if self.field == CANONICAL_HEADER.len() {
            return ParsedHeader::resolve(&self.fields).map(Some);
        }
        Ok(None)
    }
}

/// Header fields resolved by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    pub total_size: u32,
    pub audio_format: u32,
    pub num_channels: u32,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u32,
    pub bits_per_sample: u32,
    pub data_length: u32,
}

impl ParsedHeader {
    /// Build from closed fields and check internal consistency
    pub fn resolve(fields: &[(&'static str, FieldValue)]) -> Result<Self, FormatError> {
        let by_name: HashMap<&str, &FieldValue> =
            fields.iter().map(|(name, value)| (*name, value)).collect();

        let number = |name: &'static str| -> Result<u32, FormatError> {
            match by_name.get(name) {
                Some(FieldValue::Numeric(n)) => Ok(*n),
                _ => Err(FormatError::TruncatedHeader { field: name }),
            }
        };

        let header = Self {
            total_size: number(TOTAL_SIZE)?,
            audio_format: number(AUDIO_FORMAT)?,
            num_channels: number(NUM_CHANNELS)?,
            sample_rate: number(SAMPLE_RATE)?,
            byte_rate: number(BYTE_RATE)?,
            block_align: number(BLOCK_ALIGN)?,
            bits_per_sample: number(BITS_PER_SAMPLE)?,
            data_length: number(DATA_LENGTH)?,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), FormatError> {
        if self.num_channels == 0 {
            return Err(FormatError::Inconsistent("numChannels is 0".to_string()));
        }
        if !matches!(self.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(FormatError::UnsupportedBitDepth(self.bits_per_sample));
        }
        let expected_align = self.bits_per_sample / 8 * self.num_channels;
        if self.block_align != expected_align {
            return Err(FormatError::Inconsistent(format!(
                "blockAlign {} does not match {} channels of {} bits",
                self.block_align, self.num_channels, self.bits_per_sample
            )));
        }
        Ok(())
    }

    /// Bytes making up one sample of one channel
    pub fn bytes_per_channel_sample(&self) -> usize {
        (self.block_align / self.num_channels) as usize
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a canonical 44-byte header
    pub(crate) fn canonical_header(channels: u16, sample_rate: u32, bits: u16, data_length: u32) -> Vec<u8> {
        let block_align = channels * (bits / 8);
        let mut bytes = Vec::with_capacity(CANONICAL_HEADER_LEN);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_length).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&bits.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_length.to_le_bytes());
        bytes
    }

    fn read_all(bytes: &[u8]) -> Result<Option<ParsedHeader>, FormatError> {
        let mut reader = HeaderReader::new();
        let mut parsed = None;
        for &b in bytes {
            parsed = reader.push(b)?;
        }
        Ok(parsed)
    }

    #[test]
    fn test_schema_is_44_bytes_in_13_fields() {
        assert_eq!(CANONICAL_HEADER.len(), 13);
        let total: usize = CANONICAL_HEADER.iter().map(|f| f.width).sum();
        assert_eq!(total, CANONICAL_HEADER_LEN);
    }

    #[test]
    fn test_parse_canonical_header() {
        let header = read_all(&canonical_header(2, 44100, 16, 1000)).unwrap().unwrap();
        assert_eq!(header.num_channels, 2);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.byte_rate, 176_400);
        assert_eq!(header.block_align, 4);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(header.data_length, 1000);
        assert_eq!(header.total_size, 1036);
        assert_eq!(header.bytes_per_channel_sample(), 2);
    }

    #[test]
    fn test_header_incomplete_until_last_byte() {
        let bytes = canonical_header(1, 8000, 8, 10);
        assert!(read_all(&bytes[..43]).unwrap().is_none());
    }

    #[test]
    fn test_wrong_chunk_id_fails_on_fourth_byte() {
        let mut reader = HeaderReader::new();
        for &b in b"RIF" {
            assert!(reader.push(b).unwrap().is_none());
        }
        let err = reader.push(b'X').unwrap_err();
        assert_eq!(
            err,
            FormatError::ConstantMismatch {
                field: CHUNK_ID,
                expected: "RIFF".to_string(),
                found: "RIFX".to_string(),
            }
        );
    }

    #[test]
    fn test_wrong_data_section_id_rejected() {
        let mut bytes = canonical_header(1, 8000, 16, 10);
        bytes[36..40].copy_from_slice(b"LIST");
        let err = read_all(&bytes).unwrap_err();
        assert!(matches!(err, FormatError::ConstantMismatch { field: DATA_SECTION_ID, .. }));
    }

    #[test]
    fn test_non_pcm_audio_format_rejected() {
        let mut bytes = canonical_header(1, 8000, 16, 10);
        // WAVE_FORMAT_EXTENSIBLE
        bytes[20..22].copy_from_slice(&0xFFFEu16.to_le_bytes());
        let err = read_all(&bytes).unwrap_err();
        assert!(matches!(err, FormatError::ConstantMismatch { field: AUDIO_FORMAT, .. }));
    }

    #[test]
    fn test_block_align_mismatch_rejected() {
        let mut bytes = canonical_header(2, 44100, 16, 10);
        bytes[32..34].copy_from_slice(&2u16.to_le_bytes());
        assert!(matches!(read_all(&bytes), Err(FormatError::Inconsistent(_))));
    }

    #[test]
    fn test_odd_bit_depth_rejected() {
        let mut bytes = canonical_header(1, 44100, 16, 10);
        bytes[34..36].copy_from_slice(&12u16.to_le_bytes());
        assert_eq!(read_all(&bytes), Err(FormatError::UnsupportedBitDepth(12)));
    }

    #[test]
    fn test_zero_channels_rejected() {
        let mut bytes = canonical_header(1, 44100, 16, 10);
        bytes[22..24].copy_from_slice(&0u16.to_le_bytes());
        assert!(matches!(read_all(&bytes), Err(FormatError::Inconsistent(_))));
    }
}
