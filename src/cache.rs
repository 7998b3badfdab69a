//! Durable store for synthesized clips.
//!
//! Clips live directly under the configured directory (`.cache` by default).
//! Each clip is written as a raw PCM blob named by a hash of its key, next to
//! a tiny TOML sidecar that records the key itself so the store can enumerate
//! what it holds.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub const CACHE_DIR: &str = ".cache";

const CLIP_EXTENSION: &str = "pcm";
const ENTRY_EXTENSION: &str = "toml";

/// Identity of one synthesized utterance: a tense namespace plus a verb name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipKey(String);

impl ClipKey {
    pub fn new(tense_id: &str, verb_name: &str) -> Self {
        Self(format!("{tense_id}::{verb_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn file_stem(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl std::fmt::Display for ClipKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key/value byte-blob storage for raw clips.
///
/// Reads never fail: any storage problem is reported as a miss so narration
/// keeps working without persistence.
#[async_trait]
pub trait ClipStore: Send + Sync {
    async fn get(&self, key: &ClipKey) -> Option<Vec<u8>>;

    async fn put(&self, key: &ClipKey, bytes: &[u8]) -> Result<()>;

    async fn list_keys(&self) -> BTreeSet<ClipKey>;
}

/// Session-only store used when persistence is disabled.
#[derive(Debug, Default)]
pub struct MemoryClipStore {
    clips: Mutex<HashMap<ClipKey, Vec<u8>>>,
}

impl MemoryClipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClipStore for MemoryClipStore {
    async fn get(&self, key: &ClipKey) -> Option<Vec<u8>> {
        let clips = self.clips.lock().ok()?;
        clips.get(key).cloned()
    }

    async fn put(&self, key: &ClipKey, bytes: &[u8]) -> Result<()> {
        let mut clips = self
            .clips
            .lock()
            .map_err(|_| anyhow!("memory clip store lock poisoned"))?;
        clips
            .entry(key.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    async fn list_keys(&self) -> BTreeSet<ClipKey> {
        self.clips
            .lock()
            .map(|clips| clips.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ClipEntry {
    key: String,
    bytes: usize,
}

struct StoreIndex {
    keys: Mutex<BTreeSet<ClipKey>>,
}

/// Filesystem-backed store. The directory is opened lazily on first access.
pub struct FsClipStore {
    root: PathBuf,
    index: OnceCell<Option<StoreIndex>>,
}

impl FsClipStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn index(&self) -> Option<&StoreIndex> {
        self.index
            .get_or_init(|| async {
                match open_index(&self.root).await {
                    Ok(index) => Some(index),
                    Err(err) => {
                        warn!(
                            root = %self.root.display(),
                            "Clip store unavailable; continuing without persistence: {err:#}"
                        );
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    fn clip_path(&self, key: &ClipKey) -> PathBuf {
        self.root
            .join(format!("{}.{CLIP_EXTENSION}", key.file_stem()))
    }

    fn entry_path(&self, key: &ClipKey) -> PathBuf {
        self.root
            .join(format!("{}.{ENTRY_EXTENSION}", key.file_stem()))
    }
}

#[async_trait]
impl ClipStore for FsClipStore {
    async fn get(&self, key: &ClipKey) -> Option<Vec<u8>> {
        self.index().await?;
        match fs::read(self.clip_path(key)).await {
            Ok(bytes) => {
                debug!(%key, bytes = bytes.len(), "Clip cache hit");
                Some(bytes)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(%key, "Clip cache miss");
                None
            }
            Err(err) => {
                warn!(%key, "Failed to read cached clip; treating as miss: {err}");
                None
            }
        }
    }

    async fn put(&self, key: &ClipKey, bytes: &[u8]) -> Result<()> {
        let index = self
            .index()
            .await
            .ok_or_else(|| anyhow!("clip store at {} is unavailable", self.root.display()))?;

        let clip_path = self.clip_path(key);
        let already_stored = index
            .keys
            .lock()
            .map(|keys| keys.contains(key))
            .unwrap_or(false);
        if already_stored && fs::try_exists(&clip_path).await.unwrap_or(false) {
            debug!(%key, "Clip already stored; skipping write");
            return Ok(());
        }

        write_atomic(&clip_path, bytes)
            .await
            .with_context(|| format!("Writing clip {key}"))?;
        let entry = ClipEntry {
            key: key.as_str().to_string(),
            bytes: bytes.len(),
        };
        let contents = toml::to_string(&entry).context("Serializing clip entry")?;
        write_atomic(&self.entry_path(key), contents.as_bytes())
            .await
            .with_context(|| format!("Writing clip entry {key}"))?;

        if let Ok(mut keys) = index.keys.lock() {
            keys.insert(key.clone());
        }
        debug!(%key, bytes = bytes.len(), "Stored clip");
        Ok(())
    }

    async fn list_keys(&self) -> BTreeSet<ClipKey> {
        let Some(index) = self.index().await else {
            return BTreeSet::new();
        };
        index
            .keys
            .lock()
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }
}

async fn open_index(root: &Path) -> Result<StoreIndex> {
    fs::create_dir_all(root)
        .await
        .with_context(|| format!("Creating clip store directory {}", root.display()))?;

    let mut keys = BTreeSet::new();
    let mut entries = fs::read_dir(root)
        .await
        .with_context(|| format!("Listing clip store {}", root.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
            continue;
        }
        if !fs::try_exists(path.with_extension(CLIP_EXTENSION))
            .await
            .unwrap_or(false)
        {
            debug!(path = %path.display(), "Ignoring clip entry without audio");
            continue;
        }
        let parsed = fs::read_to_string(&path)
            .await
            .ok()
            .and_then(|data| toml::from_str::<ClipEntry>(&data).ok());
        match parsed {
            Some(entry) => {
                keys.insert(ClipKey(entry.key));
            }
            None => warn!(path = %path.display(), "Skipping unreadable clip entry"),
        }
    }

    info!(root = %root.display(), clips = keys.len(), "Opened clip store");
    Ok(StoreIndex {
        keys: Mutex::new(keys),
    })
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = unique_temp_path(path);
    fs::write(&temp_path, bytes).await?;
    if fs::rename(&temp_path, path).await.is_err() {
        fs::copy(&temp_path, path).await?;
        let _ = fs::remove_file(&temp_path).await;
    }
    Ok(())
}

pub(crate) fn unique_temp_path(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nonce = SEQ.fetch_add(1, Ordering::Relaxed);
    let ts_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut temp_name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("clip")
        .to_string();
    temp_name.push_str(&format!(".tmp-{ts_nanos}-{nonce}"));
    path.with_file_name(temp_name)
}
