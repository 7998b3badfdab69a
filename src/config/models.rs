use crate::config::defaults;
use crate::dataset::Favorites;
use crate::narrator::NarratorSettings;
use crate::synthesis::RetryPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// High-level app configuration; deserializable from TOML.
#[derive(Debug, Clone, Deserialize, serde::Serialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "crate::config::defaults::default_log_level")]
    pub log_level: LogLevel,
    #[serde(default = "crate::config::defaults::default_tts_model")]
    pub tts_model: String,
    #[serde(default = "crate::config::defaults::default_tts_voice")]
    pub tts_voice: String,
    #[serde(default = "crate::config::defaults::default_tts_endpoint")]
    pub tts_endpoint: String,
    #[serde(default = "crate::config::defaults::default_tts_api_key_env")]
    pub tts_api_key_env: String,
    #[serde(default = "crate::config::defaults::default_tts_max_retries")]
    pub tts_max_retries: u32,
    #[serde(default = "crate::config::defaults::default_tts_retry_base_delay_secs")]
    pub tts_retry_base_delay_secs: f32,
    #[serde(default = "crate::config::defaults::default_volume")]
    pub volume: f32,
    #[serde(default = "crate::config::defaults::default_item_pause_secs")]
    pub item_pause_secs: f32,
    #[serde(default = "crate::config::defaults::default_repeat_pause_secs")]
    pub repeat_pause_secs: f32,
    #[serde(default = "crate::config::defaults::default_sequence_repeat_pause_secs")]
    pub sequence_repeat_pause_secs: f32,
    #[serde(default = "crate::config::defaults::default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "crate::config::defaults::default_repeat")]
    pub repeat: bool,
    #[serde(default = "crate::config::defaults::default_cache_enabled")]
    pub cache_enabled: bool,
    #[serde(default = "crate::config::defaults::default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "crate::config::defaults::default_dataset_path")]
    pub dataset_path: String,
    #[serde(default)]
    pub favorite_tenses: Vec<String>,
    /// `"<tense>::<verb>"` references.
    #[serde(default)]
    pub favorite_verbs: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log_level: defaults::default_log_level(),
            tts_model: defaults::default_tts_model(),
            tts_voice: defaults::default_tts_voice(),
            tts_endpoint: defaults::default_tts_endpoint(),
            tts_api_key_env: defaults::default_tts_api_key_env(),
            tts_max_retries: defaults::default_tts_max_retries(),
            tts_retry_base_delay_secs: defaults::default_tts_retry_base_delay_secs(),
            volume: defaults::default_volume(),
            item_pause_secs: defaults::default_item_pause_secs(),
            repeat_pause_secs: defaults::default_repeat_pause_secs(),
            sequence_repeat_pause_secs: defaults::default_sequence_repeat_pause_secs(),
            progress_interval_ms: defaults::default_progress_interval_ms(),
            repeat: defaults::default_repeat(),
            cache_enabled: defaults::default_cache_enabled(),
            cache_dir: defaults::default_cache_dir(),
            dataset_path: defaults::default_dataset_path(),
            favorite_tenses: Vec::new(),
            favorite_verbs: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn narrator_settings(&self) -> NarratorSettings {
        NarratorSettings {
            item_gap: secs(self.item_pause_secs),
            repeat_gap: secs(self.repeat_pause_secs),
            sequence_repeat_gap: secs(self.sequence_repeat_pause_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.tts_max_retries,
            base_delay: secs(self.tts_retry_base_delay_secs),
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    pub fn cache_root(&self) -> PathBuf {
        PathBuf::from(&self.cache_dir)
    }

    pub fn favorites(&self) -> Favorites {
        let mut favorites = Favorites::new();
        for tense in &self.favorite_tenses {
            favorites.add_tense(tense);
        }
        for reference in &self.favorite_verbs {
            if !favorites.add_verb_ref(reference) {
                warn!(%reference, "Ignoring favorite verb without a `<tense>::<verb>` form");
            }
        }
        favorites
    }
}

/// Negative or non-finite pauses collapse to zero.
fn secs(value: f32) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f32(value.min(3600.0))
    } else {
        Duration::ZERO
    }
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
