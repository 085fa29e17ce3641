//! Process-wide TTL + LRU result cache with per-key single flight

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;

#[derive(Clone, Debug)]
struct CacheEntry {
    value: Value,
    #[allow(dead_code)]
    inserted_at: Instant,
    expires_at: Instant,
}

pub struct ToolCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    flights: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

/// Held while one caller computes a key; others wait on the same key.
pub struct FlightGuard<'a> {
    cache: &'a ToolCache,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Remove the slot once nobody else holds or waits on it.
        self.cache
            .flights
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl ToolCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            flights: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, Instant::now())
    }

    /// A value is only returned while `now < expires_at`.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, value: Value, ttl: Duration) {
        self.insert_at(key, value, ttl, Instant::now());
    }

    pub fn insert_at(&self, key: String, value: Value, ttl: Duration, now: Instant) {
        if ttl.is_zero() {
            return;
        }
        let entry = CacheEntry {
            value,
            inserted_at: now,
            expires_at: now + ttl,
        };
        self.entries.lock().put(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize computation per key. Callers re-check the cache after
    /// acquiring the guard.
    pub async fn single_flight(&self, key: &str) -> FlightGuard<'_> {
        let slot = self
            .flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = slot.lock_owned().await;
        FlightGuard {
            cache: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expired_entries_are_never_returned() {
        let cache = ToolCache::new(10);
        let t0 = Instant::now();
        cache.insert_at("k".into(), json!(1), Duration::from_secs(300), t0);
        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(299)), Some(json!(1)));
        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(300)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = ToolCache::new(2);
        cache.insert("a".into(), json!("a"), Duration::from_secs(60));
        cache.insert("b".into(), json!("b"), Duration::from_secs(60));
        assert!(cache.get("a").is_some());
        cache.insert("c".into(), json!("c"), Duration::from_secs(60));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn flight_slots_are_cleaned_up() {
        let cache = ToolCache::new(2);
        {
            let _g = cache.single_flight("k").await;
            assert_eq!(cache.flights.len(), 1);
        }
        assert_eq!(cache.flights.len(), 0);
    }
}
