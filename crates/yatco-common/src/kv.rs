//! Key/value option storage
//!
//! The sync job keeps its API token, stop flags and job status records in a
//! generic key/value store. Two flavours are used side by side:
//!
//! - a **durable** store for records that must survive restarts and cache
//!   eviction (job status, stop flag, token)
//! - a **transient** store for cheap, frequently rewritten values that carry
//!   their own expiry (status messages, the stop flag mirror)
//!
//! Both are expressed through the same [`KvStore`] trait. Backends:
//!
//! - [`MemoryKvStore`]: in-process map, TTL aware
//! - [`FileKvStore`]: one JSON file per key, shared between processes
//! - [`CachedKvStore`]: read-through cache in front of any other store
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use yatco_common::kv::{FileKvStore, KvStore};
//!
//! fn main() -> yatco_common::Result<()> {
//!     let store = FileKvStore::new("./.yatco-state/options")?;
//!     store.set("yatco_stop_import", serde_json::json!(true))?;
//!     store.set_with_ttl("yatco_cache_warming_status", "warming".into(), Duration::from_secs(600))?;
//!     Ok(())
//! }
//! ```

use crate::error::{KvError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Generic key/value storage capability
pub trait KvStore: Send + Sync {
    /// Read a value. Expired entries read as absent.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value without expiry
    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Write a value that expires after `ttl`
    fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Drop any locally cached copy of `key` so the next read hits the backend
    fn evict(&self, _key: &str) {}
}

impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        (**self).set(key, value)
    }

    fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        (**self).set_with_ttl(key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn evict(&self, key: &str) {
        (**self).evict(key)
    }
}

/// Stored value together with its optional expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|ttl| {
            Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(3650))
        });
        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

fn lock_map<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| KvError::backend("store mutex poisoned"))
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-process store, mainly for tests and single-process runs
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, key: &str, entry: Entry) -> Result<()> {
        lock_map(&self.entries)?.insert(key.to_string(), entry);
        Ok(())
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = lock_map(&self.entries)?;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            },
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.put(key, Entry::new(value, None))
    }

    fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        self.put(key, Entry::new(value, Some(ttl)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        lock_map(&self.entries)?.remove(key);
        Ok(())
    }
}

// ============================================================================
// File-backed store
// ============================================================================

/// Store keeping one JSON document per key inside a directory.
///
/// Each key lives in its own file so independent writers (an import run
/// updating its status, an operator setting the stop flag) never overwrite
/// each other's keys. Writes go to a temporary file that is renamed into
/// place, so readers see either the old or the new document.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the key files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(KvError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn write_entry(&self, key: &str, entry: &Entry) -> Result<()> {
        let path = self.key_path(key)?;
        let json = serde_json::to_vec_pretty(entry)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_data()?;
        tmp.persist(&path).map_err(|e| KvError::Io(e.error))?;

        debug!(key, path = %path.display(), "Wrote key/value entry");
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.key_path(key)?;
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: Entry = serde_json::from_slice(&raw)?;
        if entry.is_expired() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(key, error = %e, "Failed to remove expired entry");
            }
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.write_entry(key, &Entry::new(value, None))
    }

    fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        self.write_entry(key, &Entry::new(value, Some(ttl)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Read-through cache
// ============================================================================

/// Read-through cache in front of another store.
///
/// Reads are served from the cache once a key has been seen, which makes
/// repeated option lookups cheap but can return stale values when another
/// process writes the backend. Callers that need a fresh value call
/// [`KvStore::evict`] first.
#[derive(Debug)]
pub struct CachedKvStore<S> {
    inner: S,
    cache: Mutex<HashMap<String, Option<Value>>>,
}

impl<S: KvStore> CachedKvStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Access the wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of keys currently cached
    pub fn cached_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl<S: KvStore> KvStore for CachedKvStore<S> {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(cached) = lock_map(&self.cache)?.get(key) {
            return Ok(cached.clone());
        }

        let value = self.inner.get(key)?;
        lock_map(&self.cache)?.insert(key.to_string(), value.clone());
        Ok(value)
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.inner.set(key, value.clone())?;
        lock_map(&self.cache)?.insert(key.to_string(), Some(value));
        Ok(())
    }

    fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        // Expiring values are never cached; the backend owns the expiry.
        self.inner.set_with_ttl(key, value, ttl)?;
        self.evict(key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)?;
        self.evict(key);
        Ok(())
    }

    fn evict(&self, key: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(key);
        }
        self.inner.evict(key);
    }
}
