//! Versioned, age-bounded view-state persistence.
//!
//! A [`ViewStateCache`] remembers one JSON value per key (typically the
//! application name) inside a logical namespace such as `executions`. Entries
//! written under another schema version, or older than the configured maximum
//! age, are invisible and get evicted on access. Persistent caches write one
//! pretty-printed JSON file per namespace; ephemeral caches live in memory.
//!
//! [`ViewStateCacheRegistry`] creates caches lazily and hands out the same
//! instance for a namespace on every later request.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use dirs_next::config_dir;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::path_processing::{expand_tilde, file_stem_for};

/// Environment variable overriding the directory that holds persisted view state.
pub const VIEW_STATE_DIR_ENV: &str = "RUNBOARD_VIEW_STATE_DIR";

/// Schema generation written when callers do not pick one.
pub const DEFAULT_CACHE_VERSION: u32 = 1;

/// 180 days.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(180 * 24 * 60 * 60);

/// Errors surfaced by view-state cache operations.
#[derive(Debug, Error)]
pub enum ViewStateCacheError {
    /// I/O failure while reading or writing the cache file.
    #[error("view-state I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("view-state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Visibility rules for a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewStateCacheOptions {
    /// Entries written under a different version are invisible.
    pub version: u32,
    /// Entries older than this are invisible.
    pub max_age: Duration,
}

impl Default for ViewStateCacheOptions {
    fn default() -> Self {
        Self {
            version: DEFAULT_CACHE_VERSION,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

/// Stored value plus the metadata that decides its visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    #[serde(with = "ts_milliseconds")]
    pub stored_at: DateTime<Utc>,
    pub value: Value,
}

/// A visible entry returned by [`ViewStateCache::records`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub key: String,
    pub entry: CacheEntry,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: BTreeMap<String, CacheEntry>,
}

/// Key/value view-state store with version and age checks.
#[derive(Debug)]
pub struct ViewStateCache {
    namespace: String,
    options: ViewStateCacheOptions,
    path: Option<PathBuf>,
    file: Mutex<CacheFile>,
}

impl ViewStateCache {
    /// Open (or create) the cache for `namespace` inside `directory`.
    pub fn persistent(namespace: &str, options: ViewStateCacheOptions, directory: &Path) -> Result<Self, ViewStateCacheError> {
        let path = directory.join(format!("{}.json", file_stem_for(namespace)));
        let file = load_cache_file(&path)?;
        Ok(Self {
            namespace: namespace.to_string(),
            options,
            path: Some(path),
            file: Mutex::new(file),
        })
    }

    /// In-memory cache, used when no storage directory is available and in tests.
    pub fn ephemeral(namespace: &str, options: ViewStateCacheOptions) -> Self {
        Self {
            namespace: namespace.to_string(),
            options,
            path: None,
            file: Mutex::new(CacheFile::default()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn options(&self) -> ViewStateCacheOptions {
        self.options
    }

    /// Backing file, `None` for ephemeral caches.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the visible value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, Utc::now())
    }

    /// Same as [`get`](Self::get) with an explicit clock reading.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        let mut file = self.file.lock().expect("view-state lock poisoned");
        let entry = file.entries.get(key)?;
        if self.is_visible(entry, now) {
            return Some(entry.value.clone());
        }
        debug!(
            namespace = %self.namespace,
            key = %key,
            stored_version = entry.version,
            "evicting stale view-state entry"
        );
        file.entries.remove(key);
        None
    }

    /// Deserializes the visible value stored under `key`.
    ///
    /// A value that no longer matches `T` is treated as absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(error) => {
                warn!(namespace = %self.namespace, key = %key, error = %error, "ignoring unreadable view-state entry");
                None
            }
        }
    }

    /// Stores `value` under `key`, replacing any previous entry.
    pub fn put(&self, key: &str, value: Value) -> Result<(), ViewStateCacheError> {
        self.put_at(key, value, Utc::now())
    }

    /// Same as [`put`](Self::put) with an explicit clock reading.
    pub fn put_at(&self, key: &str, value: Value, now: DateTime<Utc>) -> Result<(), ViewStateCacheError> {
        let mut file = self.file.lock().expect("view-state lock poisoned");
        file.entries.insert(
            key.to_string(),
            CacheEntry {
                version: self.options.version,
                stored_at: now,
                value,
            },
        );
        self.save_locked(&file)
    }

    pub fn put_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ViewStateCacheError> {
        let value = serde_json::to_value(value)?;
        self.put(key, value)
    }

    /// Removes the entry under `key`; returns whether one existed.
    pub fn remove(&self, key: &str) -> Result<bool, ViewStateCacheError> {
        let mut file = self.file.lock().expect("view-state lock poisoned");
        let removed = file.entries.remove(key).is_some();
        if removed {
            self.save_locked(&file)?;
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<(), ViewStateCacheError> {
        let mut file = self.file.lock().expect("view-state lock poisoned");
        file.entries.clear();
        self.save_locked(&file)
    }

    /// Drops every invisible entry and returns how many were removed.
    pub fn evict_stale(&self) -> Result<usize, ViewStateCacheError> {
        self.evict_stale_at(Utc::now())
    }

    pub fn evict_stale_at(&self, now: DateTime<Utc>) -> Result<usize, ViewStateCacheError> {
        let mut file = self.file.lock().expect("view-state lock poisoned");
        let before = file.entries.len();
        file.entries.retain(|_, entry| self.is_visible(entry, now));
        let evicted = before - file.entries.len();
        if evicted > 0 {
            self.save_locked(&file)?;
        }
        Ok(evicted)
    }

    /// Visible entries ordered by key.
    pub fn records(&self) -> Vec<CacheRecord> {
        let now = Utc::now();
        let file = self.file.lock().expect("view-state lock poisoned");
        file.entries
            .iter()
            .filter(|(_, entry)| self.is_visible(entry, now))
            .map(|(key, entry)| CacheRecord {
                key: key.clone(),
                entry: entry.clone(),
            })
            .collect()
    }

    /// Number of stored entries, visible or not.
    pub fn len(&self) -> usize {
        self.file.lock().expect("view-state lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_visible(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        if entry.version != self.options.version {
            return false;
        }
        match now.signed_duration_since(entry.stored_at).to_std() {
            Ok(elapsed) => elapsed <= self.options.max_age,
            // stored in the future: clock skew, keep it
            Err(_) => true,
        }
    }

    fn save_locked(&self, file: &CacheFile) -> Result<(), ViewStateCacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(file)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Lazily creates one cache per namespace and reuses it afterwards.
#[derive(Debug)]
pub struct ViewStateCacheRegistry {
    directory: Option<PathBuf>,
    caches: Mutex<HashMap<String, Arc<ViewStateCache>>>,
}

impl ViewStateCacheRegistry {
    /// Registry persisting under `directory`, or in memory when `None`.
    pub fn new<P: Into<Option<PathBuf>>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Registry persisting under [`default_view_state_dir`].
    pub fn with_default_directory() -> Self {
        Self::new(default_view_state_dir())
    }

    pub fn ephemeral() -> Self {
        Self::new(None::<PathBuf>)
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Returns the cache for `namespace`, creating it with `options` on first use.
    ///
    /// Later calls return the existing instance; their `options` are ignored.
    pub fn cache(&self, namespace: &str, options: ViewStateCacheOptions) -> Result<Arc<ViewStateCache>, ViewStateCacheError> {
        let mut caches = self.caches.lock().expect("view-state registry lock poisoned");
        if let Some(existing) = caches.get(namespace) {
            if existing.options() != options {
                debug!(namespace = %namespace, "view-state cache already open with different options");
            }
            return Ok(Arc::clone(existing));
        }

        let cache = match &self.directory {
            Some(directory) => ViewStateCache::persistent(namespace, options, directory)?,
            None => ViewStateCache::ephemeral(namespace, options),
        };
        debug!(namespace = %namespace, path = ?cache.path(), "opened view-state cache");
        let cache = Arc::new(cache);
        caches.insert(namespace.to_string(), Arc::clone(&cache));
        Ok(cache)
    }

    /// Returns the cache for `namespace` if it was already opened.
    pub fn existing(&self, namespace: &str) -> Option<Arc<ViewStateCache>> {
        self.caches.lock().expect("view-state registry lock poisoned").get(namespace).cloned()
    }
}

/// Directory used for persisted view state.
pub fn default_view_state_dir() -> PathBuf {
    if let Ok(path) = env::var(VIEW_STATE_DIR_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("runboard")
        .join("view-state")
}

fn load_cache_file(path: &Path) -> Result<CacheFile, ViewStateCacheError> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<CacheFile>(&content) {
            Ok(file) => Ok(file),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "Failed to parse view-state file; starting empty");
                Ok(CacheFile::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(CacheFile::default()),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "Failed to read view-state file; starting empty");
            Ok(CacheFile::default())
        }
    }
}
