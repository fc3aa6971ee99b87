//! Canonical WAV fixtures

use std::io::Cursor;

/// 44-byte canonical header
pub fn header(channels: u16, sample_rate: u32, bits: u16, data_length: u32) -> Vec<u8> {
    let block_align = channels * (bits / 8);
    let mut bytes = Vec::with_capacity(44);
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

/// Mono 16-bit stream rising linearly to full scale, then falling back
///
/// 256000 samples (dataLength 512000).
pub fn ramp() -> Vec<u8> {
    const SAMPLES: usize = 256_000;
    const HALF: usize = SAMPLES / 2;

    let mut bytes = header(1, 44100, 16, (SAMPLES * 2) as u32);
    for i in 0..SAMPLES {
        let distance = if i < HALF { i + 1 } else { SAMPLES - i };
        let value = (distance as i64 * i16::MAX as i64 / HALF as i64) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// 16-bit sine written by hound
pub fn sine(channels: u16, sample_rate: u32, seconds: f32, amplitude: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = (seconds * sample_rate as f32) as usize;
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let sample =
                (amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin() * i16::MAX as f32) as i16;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
