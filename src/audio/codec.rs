// Sample codec: f32 samples <-> PCM16 little-endian <-> base64 text
//
// The agent speaks raw 16-bit PCM wrapped in base64 inside JSON messages.
// Encoding is total (out-of-range input is clamped); decoding only fails on
// malformed base64 and silently drops an odd trailing byte.

use anyhow::{Context, Result};
use base64::Engine;

/// Scale between f32 samples and i16 PCM
const PCM16_SCALE: f32 = 32768.0;

/// Convert f32 samples in [-1, 1] to PCM16 little-endian bytes
///
/// Each sample is clamped, multiplied by 32768 and truncated toward zero.
/// `1.0` saturates to `i16::MAX`.
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| {
            // NaN clamps to NaN and `as` maps it to 0
            let scaled = s.clamp(-1.0, 1.0) * PCM16_SCALE;
            scaled as i16
        })
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

/// Convert PCM16 little-endian bytes to f32 samples
///
/// An odd trailing byte (incomplete sample) is ignored.
pub fn pcm16_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect()
}

/// Encode f32 samples as base64 PCM16 text
pub fn encode(samples: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(samples_to_pcm16(samples))
}

/// Decode base64 PCM16 text into f32 samples
pub fn decode(payload: &str) -> Result<Vec<f32>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("Audio payload is not valid base64")?;

    Ok(pcm16_to_samples(&bytes))
}

/// MIME descriptor for raw PCM at the given rate, e.g. `audio/pcm;rate=16000`
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}
