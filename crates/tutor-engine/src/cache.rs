//! In-process response cache with lazy TTL expiry.
//!
//! The cache memoizes derived artifacts such as source overviews. It is never
//! relied on for correctness: a miss means the caller regenerates the value.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Keyed cache of cloneable values.
///
/// With a TTL configured, an entry older than the TTL is treated as absent and
/// removed on the `get` that observes it. Without one, entries live until
/// invalidated.
#[derive(Debug)]
pub struct ResponseCache<V> {
    ttl: Option<Duration>,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> ResponseCache<V> {
    /// Creates a cache with an optional TTL.
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `key`, if present and fresh.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Same as [`get`](Self::get) with an explicit clock reading.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let expired = entries
            .get(key)
            .is_some_and(|entry| self.is_expired(entry, now));
        if expired {
            entries.remove(key);
            tracing::debug!(key, "Cache entry expired");
            return None;
        }

        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Stores `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_at(key, value, Instant::now());
    }

    /// Same as [`set`](Self::set) with an explicit clock reading.
    pub fn set_at(&self, key: impl Into<String>, value: V, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
    }

    /// Stores `value` unless a fresh entry already exists, and returns the
    /// value that ends up cached.
    ///
    /// Two callers that generated a value for the same key concurrently both
    /// receive whichever value was stored first.
    pub fn get_or_set(&self, key: impl Into<String>, value: V) -> V {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = entries.get(&key) {
            if !self.is_expired(entry, now) {
                return entry.value.clone();
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                inserted_at: now,
            },
        );
        value
    }

    /// Removes the entry for `key`. Returns `true` if one existed.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key).is_some()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of stored entries, including ones not yet found to be expired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.inserted_at) >= ttl)
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new(None)
    }
}
