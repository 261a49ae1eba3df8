// src/engine/cache.rs

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::debug;

/// Memoised provider lookups (e.g. image or flavour name to id), shared by
/// every resource the engine drives.
///
/// Entries expire after a fixed TTL and are recomputed on the next lookup.
#[derive(Debug)]
pub struct ProviderCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    stored_at: Instant,
}

impl Default for ProviderCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

impl ProviderCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached value for `key`, if present and not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => Some(entry.value.clone()),
            Some(_) => {
                debug!(key, "cache entry expired");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries().insert(
            key.into(),
            CacheEntry {
                value: value.into(),
                stored_at: Instant::now(),
            },
        );
    }

    /// Get the value for `key`, computing and caching it on a miss.
    ///
    /// A failed computation is not cached.
    pub fn get_or_insert_with<F>(&self, key: &str, compute: F) -> Result<String>
    where
        F: FnOnce() -> Result<String>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        debug!(key, "cache miss: computing value");
        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &str) {
        if self.entries().remove(key).is_some() {
            debug!(key, "invalidated cache entry");
        }
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
