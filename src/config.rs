use crate::error::AppError;
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const APP_DIR: &str = "ktvplay";
const STATE_FILE: &str = "state.json";

pub const KEY_QUEUE_ITEMS: &str = "queue.items";
pub const KEY_QUEUE_CURRENT_INDEX: &str = "queue.current_index";
pub const KEY_PLAYER_VOLUME: &str = "player.volume";
pub const KEY_LIBRARY_FOLDERS: &str = "library.folders";

pub const SUPPORTED_EXTENSIONS: &[&str] = &["mkv", "mpg"];

pub fn is_supported_media(path: &Path) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    SUPPORTED_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("KTVPLAY_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn state_path() -> Result<PathBuf> {
    Ok(state_file_in(&config_root()?))
}

pub fn state_file_in(root: &Path) -> PathBuf {
    root.join(STATE_FILE)
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let root = config_root()?;
    fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
    Ok(root)
}

/// Tunables of the media engine adapter.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub track_refresh_delay: Duration,
    pub max_track_retries: u32,
    pub completion_margin_ms: i64,
    pub max_native_volume: i32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            track_refresh_delay: Duration::from_millis(300),
            max_track_retries: 10,
            completion_margin_ms: 500,
            max_native_volume: 100,
        }
    }
}

/// Durable string-keyed storage for queue, volume and library state.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, AppError>;
    fn set(&self, key: &str, value: Value) -> Result<(), AppError>;
    fn remove(&self, key: &str) -> Result<(), AppError>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;

/// In-memory store for tests and runs that must not touch disk.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        let entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), AppError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten on every change.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_entries(&path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %path.display(), "ignoring unreadable state file: {err:#}");
                Map::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn open_default() -> Result<Self> {
        ensure_config_dir()?;
        Ok(Self::open(state_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        let entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), AppError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.insert(key.to_string(), value);
        self.flush(&entries).map_err(persistence)
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.flush(&entries).map_err(persistence)
    }
}

fn read_entries(path: &Path) -> Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    let entries: Map<String, Value> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse state file {}", path.display()))?;
    Ok(entries)
}

fn persistence(err: anyhow::Error) -> AppError {
    AppError::Persistence(format!("{err:#}"))
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> AppError {
    AppError::Persistence(String::from("state store lock poisoned"))
}

pub fn normalize_path(path: &Path) -> PathBuf {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    strip_windows_verbatim_prefix(&canonical)
}

pub fn strip_windows_verbatim_prefix(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();

    if let Some(trimmed) = raw.strip_prefix(r"\\?\UNC\") {
        return PathBuf::from(format!(r"\\{trimmed}"));
    }

    if let Some(trimmed) = raw.strip_prefix(r"\\?\") {
        return PathBuf::from(trimmed);
    }

    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let store = JsonFileStore::open(&path);
        store
            .set(KEY_PLAYER_VOLUME, json!(0.5))
            .expect("set volume");
        store
            .set(KEY_QUEUE_ITEMS, json!(["/ktv/a.mkv"]))
            .expect("set items");
        store.remove(KEY_QUEUE_ITEMS).expect("remove items");

        let reopened = JsonFileStore::open(&path);
        assert_eq!(
            reopened.get(KEY_PLAYER_VOLUME).expect("get"),
            Some(json!(0.5))
        );
        assert_eq!(reopened.get(KEY_QUEUE_ITEMS).expect("get"), None);
    }

    #[test]
    fn corrupt_state_file_opens_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(&path, b"{ not json").expect("write");

        let store = JsonFileStore::open(&path);
        assert_eq!(store.get(KEY_PLAYER_VOLUME).expect("get"), None);
    }

    #[test]
    fn write_failure_surfaces_as_persistence_error() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file, not a directory").expect("write");

        let store = JsonFileStore::open(blocker.join("state.json"));
        let err = store
            .set(KEY_PLAYER_VOLUME, json!(1.0))
            .expect_err("parent is a file");
        assert!(matches!(err, AppError::Persistence(_)));
    }

    #[test]
    fn extension_allow_list_is_case_insensitive() {
        assert!(is_supported_media(Path::new("/ktv/song.MKV")));
        assert!(is_supported_media(Path::new("/ktv/song.mpg")));
        assert!(!is_supported_media(Path::new("/ktv/song.mp4")));
        assert!(!is_supported_media(Path::new("/ktv/song")));
    }

    #[test]
    fn strips_windows_verbatim_prefix() {
        let cleaned = strip_windows_verbatim_prefix(Path::new(r"\\?\E:\KTV\a.mkv"));
        assert_eq!(cleaned, PathBuf::from(r"E:\KTV\a.mkv"));
    }
}
