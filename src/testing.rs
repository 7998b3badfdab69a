//! In-process doubles for the speech service, the output device and the clip store.

use crate::cache::{ClipKey, ClipStore, MemoryClipStore};
use crate::codec::DecodedClip;
use crate::errors::BackendError;
use crate::playback::AudioOutput;
use crate::synthesis::{Candidate, Content, InlineData, Part, SpeechBackend, SpeechResponse};
use anyhow::Result;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Deterministic quarter second of PCM derived from the script text.
pub fn pcm_for(script: &str) -> Vec<u8> {
    let bytes = script.as_bytes();
    (0..6_000)
        .flat_map(|i| {
            let seed = bytes.get(i % bytes.len().max(1)).copied().unwrap_or(0);
            (seed as i16 * 64).to_le_bytes()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum FakeMode {
    Speak,
    RateLimited,
    ServerError,
    NoAudio,
    /// Speak, except for scripts starting with the prefix, which get a 500.
    FailFor(String),
}

pub struct FakeBackend {
    mode: FakeMode,
    latency: Duration,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl FakeBackend {
    pub fn new(mode: FakeMode) -> Self {
        Self {
            mode,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(script, _)| script.clone())
            .collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    fn spoken(script: &str) -> SpeechResponse {
        SpeechResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    parts: vec![Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: Some("audio/L16;codec=pcm;rate=24000".into()),
                            data: BASE64_STANDARD.encode(pcm_for(script)),
                        }),
                    }],
                }),
            }],
        }
    }
}

#[async_trait]
impl SpeechBackend for FakeBackend {
    async fn generate(&self, script: &str) -> Result<SpeechResponse, BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push((script.to_string(), Instant::now()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match &self.mode {
            FakeMode::Speak => Ok(Self::spoken(script)),
            FakeMode::RateLimited => Err(BackendError::RateLimited { status: 429 }),
            FakeMode::ServerError => Err(BackendError::Status {
                status: 500,
                message: "internal".into(),
            }),
            FakeMode::NoAudio => Ok(SpeechResponse::default()),
            FakeMode::FailFor(prefix) if script.starts_with(prefix.as_str()) => {
                Err(BackendError::Status {
                    status: 500,
                    message: "internal".into(),
                })
            }
            FakeMode::FailFor(_) => Ok(Self::spoken(script)),
        }
    }
}

#[derive(Default)]
struct FakeDevice {
    duration: Duration,
    accumulated: Duration,
    running_since: Option<Instant>,
    stopped: bool,
    played: Vec<DecodedClip>,
    stops: usize,
}

impl FakeDevice {
    fn position(&self) -> Duration {
        let running = self
            .running_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        (self.accumulated + running).min(self.duration)
    }
}

/// Output device driven by tokio's clock so paused-time tests stay deterministic.
#[derive(Default)]
pub struct FakeOutput {
    device: Mutex<FakeDevice>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> Vec<DecodedClip> {
        self.device.lock().unwrap().played.clone()
    }

    pub fn stops(&self) -> usize {
        self.device.lock().unwrap().stops
    }
}

impl AudioOutput for FakeOutput {
    fn start(&self, clip: &DecodedClip) -> Result<()> {
        let mut device = self.device.lock().unwrap();
        device.duration = clip.duration();
        device.accumulated = Duration::ZERO;
        device.running_since = Some(Instant::now());
        device.stopped = false;
        device.played.push(clip.clone());
        Ok(())
    }

    fn suspend(&self) {
        let mut device = self.device.lock().unwrap();
        if let Some(since) = device.running_since.take() {
            device.accumulated += since.elapsed();
        }
    }

    fn resume(&self) {
        let mut device = self.device.lock().unwrap();
        if device.running_since.is_none() {
            device.running_since = Some(Instant::now());
        }
    }

    fn stop(&self) {
        let mut device = self.device.lock().unwrap();
        device.running_since = None;
        device.stopped = true;
        device.stops += 1;
    }

    fn position(&self) -> Duration {
        self.device.lock().unwrap().position()
    }

    fn is_drained(&self) -> bool {
        let device = self.device.lock().unwrap();
        device.stopped || device.position() >= device.duration
    }
}

/// Memory store that counts writes.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryClipStore,
    puts: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClipStore for CountingStore {
    async fn get(&self, key: &ClipKey) -> Option<Vec<u8>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &ClipKey, bytes: &[u8]) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, bytes).await
    }

    async fn list_keys(&self) -> BTreeSet<ClipKey> {
        self.inner.list_keys().await
    }
}
