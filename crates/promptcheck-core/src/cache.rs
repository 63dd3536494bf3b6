use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// One memoized provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Seconds until expiry; 0 means never.
    #[serde(default)]
    pub ttl: u64,
}

type CacheDocument = BTreeMap<String, CacheEntry>;

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub keys: Vec<String>,
    pub cache_file: PathBuf,
    pub cache_file_exists: bool,
}

/// File-backed memoization cache for provider calls.
///
/// The whole key space lives in one JSON document that is read fully before
/// every lookup and rewritten fully after every store. Unreadable or
/// malformed content is treated as an empty cache so corruption can never
/// abort a run; the next successful `set` overwrites the bad document.
/// Concurrent writers from independent processes can lose updates
/// (last writer wins); in-process use is safe because the runner never
/// issues overlapping writes for the same key.
#[derive(Debug, Clone)]
pub struct FileCache {
    enabled: bool,
    cache_dir: PathBuf,
    cache_file: PathBuf,
}

impl FileCache {
    pub fn new(cache_dir: impl Into<PathBuf>, enabled: bool) -> Self {
        let cache_dir = cache_dir.into();
        let cache_file = cache_dir.join("cache.json");
        Self { enabled, cache_dir, cache_file }
    }

    pub fn from_settings(settings: &crate::config::CacheSettings) -> Self {
        let dir = settings
            .cache_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".promptcheck/cache"));
        Self::new(dir, settings.enabled)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    fn load(&self) -> CacheDocument {
        let content = match fs::read_to_string(&self.cache_file) {
            Ok(content) => content,
            Err(_) => return CacheDocument::new(),
        };
        match serde_json::from_str(&content) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(file = %self.cache_file.display(), %err, "cache file unreadable, treating as empty");
                CacheDocument::new()
            }
        }
    }

    fn persist(&self, doc: &CacheDocument) {
        if let Err(err) = fs::create_dir_all(&self.cache_dir) {
            warn!(dir = %self.cache_dir.display(), %err, "could not create cache directory");
            return;
        }
        let serialized = match serde_json::to_string(doc) {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, "could not serialize cache document");
                return;
            }
        };
        if let Err(err) = fs::write(&self.cache_file, serialized) {
            warn!(file = %self.cache_file.display(), %err, "could not write cache file");
        }
    }

    /// Look up a key. Absent when disabled, unknown, or expired.
    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let doc = self.load();
        let entry = doc.get(key)?;
        if is_expired(entry) {
            debug!(key, "cache entry expired");
            return None;
        }
        Some(entry.value.clone())
    }

    /// Store a value under a key, overwriting any prior entry. No-op when
    /// disabled. `ttl` is in seconds; 0 means never expire.
    pub fn set(&self, key: &str, value: Value, ttl: u64) {
        if !self.enabled {
            return;
        }
        let mut doc = self.load();
        doc.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: Utc::now().timestamp_millis(),
                ttl,
            },
        );
        self.persist(&doc);
    }

    pub fn clear(&self) {
        if !self.enabled {
            return;
        }
        self.persist(&CacheDocument::new());
    }

    /// Reports live keys only: entries whose TTL has elapsed are excluded
    /// even if they are still present in the document.
    pub fn stats(&self) -> CacheStats {
        let doc = if self.enabled { self.load() } else { CacheDocument::new() };
        let keys: Vec<String> = doc
            .iter()
            .filter(|(_, entry)| !is_expired(entry))
            .map(|(key, _)| key.clone())
            .collect();
        CacheStats {
            enabled: self.enabled,
            size: keys.len(),
            keys,
            cache_file: self.cache_file.clone(),
            cache_file_exists: self.cache_file.exists(),
        }
    }
}

fn is_expired(entry: &CacheEntry) -> bool {
    if entry.ttl == 0 {
        return false;
    }
    let age_ms = Utc::now().timestamp_millis() - entry.created_at;
    age_ms >= entry.ttl as i64 * 1000
}

/// Deterministic digest over the four inputs that fully determine a provider
/// call. Object keys are sorted recursively before hashing so semantically
/// identical calls always collide regardless of map iteration order.
pub fn generate_cache_key(
    model: &str,
    prompt_content: &str,
    variables: &Map<String, Value>,
    provider_config: &Map<String, Value>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt_content.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(&Value::Object(variables.clone())).as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(&Value::Object(provider_config.clone())).as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_json(value: &Value) -> String {
    fn normalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), normalize(v)))
                    .collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
            other => other.clone(),
        }
    }
    normalize(value).to_string()
}
