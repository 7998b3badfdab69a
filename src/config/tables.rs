use super::defaults;
use super::models::{AppConfig, LogLevel};
use serde::Deserialize;

/// Sectioned on-disk layout of `conf/config.toml`.
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub(super) struct ConfigTables {
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    tts: TtsConfig,
    #[serde(default)]
    playback: PlaybackConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    dataset: DatasetConfig,
    #[serde(default)]
    favorites: FavoritesConfig,
}

impl From<ConfigTables> for AppConfig {
    fn from(tables: ConfigTables) -> Self {
        AppConfig {
            log_level: tables.logging.log_level,
            tts_model: tables.tts.model,
            tts_voice: tables.tts.voice,
            tts_endpoint: tables.tts.endpoint,
            tts_api_key_env: tables.tts.api_key_env,
            tts_max_retries: tables.tts.max_retries,
            tts_retry_base_delay_secs: tables.tts.retry_base_delay_secs,
            volume: tables.playback.volume,
            item_pause_secs: tables.playback.item_pause_secs,
            repeat_pause_secs: tables.playback.repeat_pause_secs,
            sequence_repeat_pause_secs: tables.playback.sequence_repeat_pause_secs,
            progress_interval_ms: tables.playback.progress_interval_ms,
            repeat: tables.playback.repeat,
            cache_enabled: tables.cache.enabled,
            cache_dir: tables.cache.dir,
            dataset_path: tables.dataset.path,
            favorite_tenses: tables.favorites.tenses,
            favorite_verbs: tables.favorites.verbs,
        }
    }
}

impl From<&AppConfig> for ConfigTables {
    fn from(config: &AppConfig) -> Self {
        ConfigTables {
            logging: LoggingConfig {
                log_level: config.log_level,
            },
            tts: TtsConfig {
                model: config.tts_model.clone(),
                voice: config.tts_voice.clone(),
                endpoint: config.tts_endpoint.clone(),
                api_key_env: config.tts_api_key_env.clone(),
                max_retries: config.tts_max_retries,
                retry_base_delay_secs: config.tts_retry_base_delay_secs,
            },
            playback: PlaybackConfig {
                volume: config.volume,
                item_pause_secs: config.item_pause_secs,
                repeat_pause_secs: config.repeat_pause_secs,
                sequence_repeat_pause_secs: config.sequence_repeat_pause_secs,
                progress_interval_ms: config.progress_interval_ms,
                repeat: config.repeat,
            },
            cache: CacheConfig {
                enabled: config.cache_enabled,
                dir: config.cache_dir.clone(),
            },
            dataset: DatasetConfig {
                path: config.dataset_path.clone(),
            },
            favorites: FavoritesConfig {
                tenses: config.favorite_tenses.clone(),
                verbs: config.favorite_verbs.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    log_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: defaults::default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct TtsConfig {
    #[serde(default = "defaults::default_tts_model")]
    model: String,
    #[serde(default = "defaults::default_tts_voice")]
    voice: String,
    #[serde(default = "defaults::default_tts_endpoint")]
    endpoint: String,
    #[serde(default = "defaults::default_tts_api_key_env")]
    api_key_env: String,
    #[serde(default = "defaults::default_tts_max_retries")]
    max_retries: u32,
    #[serde(default = "defaults::default_tts_retry_base_delay_secs")]
    retry_base_delay_secs: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        TtsConfig {
            model: defaults::default_tts_model(),
            voice: defaults::default_tts_voice(),
            endpoint: defaults::default_tts_endpoint(),
            api_key_env: defaults::default_tts_api_key_env(),
            max_retries: defaults::default_tts_max_retries(),
            retry_base_delay_secs: defaults::default_tts_retry_base_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct PlaybackConfig {
    #[serde(default = "defaults::default_volume")]
    volume: f32,
    #[serde(default = "defaults::default_item_pause_secs")]
    item_pause_secs: f32,
    #[serde(default = "defaults::default_repeat_pause_secs")]
    repeat_pause_secs: f32,
    #[serde(default = "defaults::default_sequence_repeat_pause_secs")]
    sequence_repeat_pause_secs: f32,
    #[serde(default = "defaults::default_progress_interval_ms")]
    progress_interval_ms: u64,
    #[serde(default = "defaults::default_repeat")]
    repeat: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        PlaybackConfig {
            volume: defaults::default_volume(),
            item_pause_secs: defaults::default_item_pause_secs(),
            repeat_pause_secs: defaults::default_repeat_pause_secs(),
            sequence_repeat_pause_secs: defaults::default_sequence_repeat_pause_secs(),
            progress_interval_ms: defaults::default_progress_interval_ms(),
            repeat: defaults::default_repeat(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct CacheConfig {
    #[serde(default = "defaults::default_cache_enabled")]
    enabled: bool,
    #[serde(default = "defaults::default_cache_dir")]
    dir: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: defaults::default_cache_enabled(),
            dir: defaults::default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct DatasetConfig {
    #[serde(default = "defaults::default_dataset_path")]
    path: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            path: defaults::default_dataset_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
struct FavoritesConfig {
    #[serde(default)]
    tenses: Vec<String>,
    #[serde(default)]
    verbs: Vec<String>,
}
