//! In-memory TTL cache for analysis results.
//!
//! | Data | Cache key | TTL | Invalidation |
//! |------|-----------|-----|--------------|
//! | Analysis results | `{intent}\|{context}` | 5 min | `clear` / TTL |
//! | IDF table | registry state | 5 min | registry change / TTL |
//!
//! Expiry is lazy: an expired entry is dropped on the read that finds it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A bounded-lifetime key/value cache.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, (V, Instant)>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Fetch a live entry; expired entries are evicted on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, inserted)) if inserted.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, value: V) {
        self.entries.lock().insert(key, (value, Instant::now()));
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
