//! Conversion from the speech service's base64, headerless PCM payload into
//! planar float buffers ready for the output device.

use crate::errors::CodecError;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use std::time::Duration;

/// Output rate of the speech service.
pub const SAMPLE_RATE: u32 = 24_000;
pub const CHANNELS: u16 = 1;

const BYTES_PER_SAMPLE: usize = 2;

/// A playable buffer: one float array per channel, all of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedClip {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl DecodedClip {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channel(&self, idx: usize) -> Option<&[f32]> {
        self.channels.get(idx).map(Vec::as_slice)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Frame-interleaved samples, the layout `rodio` sources expect.
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.frames() * self.channels.len());
        for frame in 0..self.frames() {
            for channel in &self.channels {
                out.push(channel[frame]);
            }
        }
        out
    }
}

pub fn decode_base64_to_bytes(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(BASE64_STANDARD.decode(text.trim())?)
}

/// Interpret `bytes` as interleaved signed 16-bit little-endian PCM.
pub fn bytes_to_playable_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: u16,
) -> Result<DecodedClip, CodecError> {
    if sample_rate == 0 || channel_count == 0 {
        return Err(CodecError::UnsupportedFormat {
            sample_rate,
            channels: channel_count,
        });
    }
    let channel_count = channel_count as usize;
    let frame_bytes = channel_count * BYTES_PER_SAMPLE;
    if bytes.len() % frame_bytes != 0 {
        return Err(CodecError::MalformedAudio {
            len: bytes.len(),
            frame_bytes,
        });
    }

    let frames = bytes.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for (idx, sample) in bytes.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
        let value = i16::from_le_bytes([sample[0], sample[1]]);
        channels[idx % channel_count].push(value as f32 / 32768.0);
    }

    Ok(DecodedClip {
        sample_rate,
        channels,
    })
}

/// Decode a stored clip using the service's fixed format.
pub fn decode_clip(bytes: &[u8]) -> Result<DecodedClip, CodecError> {
    bytes_to_playable_buffer(bytes, SAMPLE_RATE, CHANNELS)
}
