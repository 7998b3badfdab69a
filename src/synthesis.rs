//! Speech synthesis: script building, the remote speech backend, and the
//! client that retries throttled calls.
//!
//! The client knows nothing about caching; it turns a script into raw PCM bytes.

use crate::cancellation::CancellationToken;
use crate::codec::decode_base64_to_bytes;
use crate::dataset::VerbConjugationSet;
use crate::errors::{BackendError, SynthesisError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_VOICE: &str = "Charon";

/// Spoken script for one verb: its name, then one short sentence per conjugation.
pub fn build_script(verb: &VerbConjugationSet) -> String {
    let mut sentences = Vec::with_capacity(verb.conjugations.len() + 1);
    sentences.push(format!("{}.", verb.name));
    for conjugation in &verb.conjugations {
        sentences.push(format!(
            "{} {}.",
            conjugation.primary_pronoun(),
            conjugation.form
        ));
    }
    sentences.join(" ")
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: String,
}

impl SpeechResponse {
    /// The first inline audio payload of the first candidate.
    pub fn first_audio_payload(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .filter_map(|part| part.inline_data.as_ref())
            .map(|inline| inline.data.as_str())
            .find(|data| !data.is_empty())
    }
}

/// The remote text-to-speech collaborator.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn generate(&self, script: &str) -> Result<SpeechResponse, BackendError>;
}

/// `generateContent` call against a Gemini TTS model with a prebuilt voice.
pub struct GeminiBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    voice: String,
    api_key: String,
}

impl GeminiBackend {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            voice: voice.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }

    fn payload(&self, script: &str) -> serde_json::Value {
        serde_json::json!({
            "contents": [{
                "parts": [{ "text": script }]
            }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.voice }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl SpeechBackend for GeminiBackend {
    async fn generate(&self, script: &str) -> Result<SpeechResponse, BackendError> {
        debug!(
            model = %self.model,
            voice = %self.voice,
            chars = script.len(),
            "Requesting speech synthesis"
        );
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.payload(script))
            .send()
            .await
            .map_err(|err| BackendError::Http(err.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::RateLimited {
                status: status.as_u16(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|err| BackendError::Http(err.to_string()))?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: body,
            });
        }
        serde_json::from_str(&body).map_err(|err| BackendError::Parse(err.to_string()))
    }
}

/// Bounded exponential backoff applied to throttled calls only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

#[derive(Clone)]
pub struct SynthesisClient {
    backend: Arc<dyn SpeechBackend>,
    retry: RetryPolicy,
}

impl SynthesisClient {
    pub fn new(backend: Arc<dyn SpeechBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Synthesize `script` into raw 16-bit PCM bytes.
    pub async fn synthesize(
        &self,
        script: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, SynthesisError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = cancel
                .run_until_cancelled(self.backend.generate(script), "synthesis")
                .await?;
            match result {
                Ok(response) => {
                    let payload = response
                        .first_audio_payload()
                        .ok_or(SynthesisError::NoAudioReturned)?;
                    let bytes = decode_base64_to_bytes(payload)?;
                    info!(attempt, bytes = bytes.len(), "Synthesized speech");
                    return Ok(bytes);
                }
                Err(err) if err.is_rate_limited() => {
                    if attempt > self.retry.max_retries {
                        warn!(attempt, "Speech service still throttled; giving up");
                        return Err(SynthesisError::Exhausted { attempts: attempt, last: err });
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Speech service throttled; backing off"
                    );
                    cancel.sleep(delay, "synthesis backoff").await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
