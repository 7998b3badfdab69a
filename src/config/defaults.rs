use super::models::LogLevel;

pub(crate) fn default_log_level() -> LogLevel {
    LogLevel::Info
}

pub(crate) fn default_tts_model() -> String {
    crate::synthesis::DEFAULT_MODEL.to_string()
}

pub(crate) fn default_tts_voice() -> String {
    crate::synthesis::DEFAULT_VOICE.to_string()
}

pub(crate) fn default_tts_endpoint() -> String {
    crate::synthesis::DEFAULT_ENDPOINT.to_string()
}

pub(crate) fn default_tts_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

pub(crate) fn default_tts_max_retries() -> u32 {
    3
}

pub(crate) fn default_tts_retry_base_delay_secs() -> f32 {
    2.0
}

pub(crate) fn default_volume() -> f32 {
    1.0
}

pub(crate) fn default_item_pause_secs() -> f32 {
    0.7
}

pub(crate) fn default_repeat_pause_secs() -> f32 {
    1.0
}

pub(crate) fn default_sequence_repeat_pause_secs() -> f32 {
    1.3
}

pub(crate) fn default_progress_interval_ms() -> u64 {
    50
}

pub(crate) fn default_repeat() -> bool {
    false
}

pub(crate) fn default_cache_enabled() -> bool {
    true
}

pub(crate) fn default_cache_dir() -> String {
    crate::cache::CACHE_DIR.to_string()
}

pub(crate) fn default_dataset_path() -> String {
    "data/verbs.json".to_string()
}
