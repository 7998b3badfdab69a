//! Error types for the narration core.
//!
//! Each component boundary reports a typed error so the narrator can decide
//! whether to retry, skip the item, or stop, without inspecting messages.

use crate::cancellation::Cancelled;
use crate::playback::PlayerPhase;
use thiserror::Error;

/// Failures turning a wire payload into a playable buffer.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("audio payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("malformed PCM payload: {len} bytes is not a multiple of {frame_bytes}")]
    MalformedAudio { len: usize, frame_bytes: usize },

    #[error("unsupported audio format: {sample_rate} Hz, {channels} channel(s)")]
    UnsupportedFormat { sample_rate: u32, channels: u16 },
}

/// Failures reported by the remote speech service.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("speech service throttled the request (status {status})")]
    RateLimited { status: u16 },

    #[error("speech service returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("HTTP request to speech service failed: {0}")]
    Http(String),

    #[error("failed to parse speech service response: {0}")]
    Parse(String),
}

impl BackendError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, BackendError::RateLimited { .. })
    }
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("speech service returned no audio")]
    NoAudioReturned,

    #[error("speech synthesis gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: BackendError },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("cannot {operation} while player is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: PlayerPhase,
    },

    #[error("audio output failed: {0:#}")]
    Device(anyhow::Error),
}

/// Failures of one narrated item, or of a rejected narration request.
#[derive(Debug, Error)]
pub enum NarrationError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("narrator has been disposed")]
    Disposed,
}

impl NarrationError {
    /// Cancellation may surface directly or wrapped by the synthesis client.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            NarrationError::Cancelled(_) | NarrationError::Synthesis(SynthesisError::Cancelled(_))
        )
    }
}
