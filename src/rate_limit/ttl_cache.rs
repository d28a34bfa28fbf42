//! Time-to-live cache for upstream responses.
//!
//! A response served from this cache never reaches the network, so it costs
//! no quota. The guarded client counts such hits with
//! [`QuotaLimiter::record_cache_hit`](crate::rate_limit::QuotaLimiter::record_cache_hit).
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use quota_gate::rate_limit::TtlCache;
//!
//! let mut cache: TtlCache<String, String> = TtlCache::new(Duration::from_secs(5), 100);
//!
//! cache.insert("/quotes?symbols=AAPL".to_string(), "{}".to_string());
//! assert_eq!(cache.get(&"/quotes?symbols=AAPL".to_string()), Some("{}".to_string()));
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A bounded cache whose entries expire after a fixed TTL.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, (V, Instant)>,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a fresh value.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .get(key)
            .filter(|(_, stored_at)| stored_at.elapsed() < self.ttl)
            .map(|(value, _)| value.clone())
    }

    /// Insert or replace a value.
    ///
    /// When full, expired entries are purged first, then the oldest entry is
    /// evicted.
    pub fn insert(&mut self, key: K, value: V) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.purge_expired();
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(key, (value, Instant::now()));
    }

    /// Remove an entry, returning it if it was still fresh.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries
            .remove(key)
            .filter(|(_, stored_at)| stored_at.elapsed() < self.ttl)
            .map(|(value, _)| value)
    }

    /// Drop every expired entry.
    pub fn purge_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, stored_at)| stored_at.elapsed() < ttl);
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, (_, stored_at))| *stored_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
