//! Value-aware deduplication of exposures.
//!
//! The cache maps `"{flag}:{subject}"` to the last reported
//! `"{allocation}:{variant}"`. An exposure is a duplicate only when its key is
//! cached with an identical value; a changed value overwrites the entry and is
//! reported again.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::DEFAULT_DEDUP_CACHE_CAPACITY;

/// Thread-safe LRU cache of recently reported exposures.
pub struct ExposureDeduplicator {
    cache: Mutex<LruCache<String, String>>,
}

impl ExposureDeduplicator {
    /// Create a deduplicator remembering up to `capacity` keys (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns `true` if `key` was last seen with exactly `value`.
    ///
    /// Otherwise records `value` under `key` (evicting the least recently used
    /// entry when full) and returns `false`. The check and the write happen
    /// under one lock, so racing callers cannot both see a first sighting.
    pub fn is_duplicate(&self, key: &str, value: &str) -> bool {
        let mut cache = self.cache.lock();

        if cache.peek(key).is_some_and(|seen| seen == value) {
            return true;
        }

        cache.put(key.to_owned(), value.to_owned());
        false
    }

    /// Number of keys currently remembered.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }
}

impl Default for ExposureDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for ExposureDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.lock();
        f.debug_struct("ExposureDeduplicator")
            .field("len", &cache.len())
            .field("capacity", &cache.cap())
            .finish()
    }
}
