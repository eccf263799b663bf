//! PCM16 audio codec helpers.
//!
//! Audio never travels as binary WebSocket frames: it is carried as base64
//! text inside JSON events. These helpers convert between the wire
//! representation and in-memory `i16` sample buffers.

use base64::prelude::*;
use std::path::Path;

use super::base::DEFAULT_SAMPLE_RATE;

/// Encode PCM16 samples as base64 of their little-endian bytes.
pub fn encode_pcm16(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    BASE64_STANDARD.encode(bytes)
}

/// Decode base64 little-endian PCM16 into samples.
///
/// A trailing odd byte cannot form a sample and is discarded.
pub fn decode_pcm16(encoded: &str) -> Result<Vec<i16>, base64::DecodeError> {
    let bytes = BASE64_STANDARD.decode(encoded)?;
    if bytes.len() % 2 != 0 {
        tracing::warn!("Audio payload has odd length {}, dropping last byte", bytes.len());
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Convert float samples in `[-1.0, 1.0]` to PCM16, clamping out-of-range input.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Concatenate two sample buffers into a freshly allocated one.
pub fn merge_samples(base: &[i16], append: &[i16]) -> Vec<i16> {
    let mut merged = Vec::with_capacity(base.len() + append.len());
    merged.extend_from_slice(base);
    merged.extend_from_slice(append);
    merged
}

/// `floor(ms * sample_rate / 1000)`
#[inline]
pub fn ms_to_samples(ms: u64, sample_rate: u32) -> usize {
    (ms.saturating_mul(sample_rate as u64) / 1000) as usize
}

/// `floor(samples / sample_rate * 1000)`
#[inline]
pub fn samples_to_ms(samples: usize, sample_rate: u32) -> u64 {
    (samples as u64).saturating_mul(1000) / sample_rate.max(1) as u64
}

/// Read a mono 16-bit WAV file.
pub fn read_wav_pcm16(path: &Path) -> Result<(Vec<i16>, hound::WavSpec), hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
    Ok((samples, spec))
}

/// Write mono PCM16 samples to a WAV file at the default sample rate.
pub fn write_wav_pcm16(path: &Path, samples: &[i16]) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: DEFAULT_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()
}
