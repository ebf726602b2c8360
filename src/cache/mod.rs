// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read-path cache.
//!
//! Bounded, TTL-aware key/value cache fronting the router's reads.
//!
//! # Eviction
//!
//! - **Capacity**: inserting beyond `max_entries` evicts the least recently
//!   used entry. Recency is a strict order, so there are never ties.
//! - **TTL**: an entry older than its ttl is dropped on access, or in bulk by
//!   [`CacheLayer::sweep_expired`]. Expired entries look exactly like misses.
//!
//! The lock is held for a single map operation and never across store I/O.
//! A read-through caller that fetched a value without the lock uses
//! [`CacheLayer::generation`] and [`CacheLayer::put_if_current`] so an
//! invalidation that raced the fetch wins.
//! Prefix invalidation and sweeping scan all entries; everything else is
//! O(1) amortized.
//!
//! # Example
//!
//! ```
//! use adaptive_sync::{CacheLayer, Entity};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let cache = CacheLayer::new(2, Duration::from_secs(60));
//! for id in ["a", "b", "c"] {
//!     cache.put_default(id, Entity::new(id, json!({})));
//! }
//!
//! assert!(cache.get("a").is_none()); // evicted
//! assert!(cache.get("b").is_some());
//! assert!(cache.get("c").is_some());
//! assert_eq!(cache.stats().evictions, 1);
//! ```

mod lru;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::debug;

use crate::entity::Entity;
use lru::LruList;

/// Cache statistics, for monitoring only.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Entries dropped because their ttl elapsed
    pub expirations: u64,
    pub entries: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

/// Bounded LRU cache with per-entry ttl.
pub struct CacheLayer {
    entries: Mutex<LruList>,
    max_entries: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    /// Bumped under the entries lock by every invalidation
    generation: AtomicU64,
}

impl CacheLayer {
    /// `max_entries == 0` disables caching entirely.
    #[must_use]
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruList::default()),
            max_entries,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up `key`. Misses and expired entries both return `None`.
    pub fn get(&self, key: &str) -> Option<Entity> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = entries.slot(key).map(|slot| slot.is_expired(now));
        let Some(expired) = expired else {
            drop(entries);
            self.record_miss();
            return None;
        };

        if expired {
            entries.remove(key);
            let len = entries.len();
            drop(entries);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_lookup("expired");
            crate::metrics::record_cache_eviction("ttl", 1);
            crate::metrics::set_cache_entries(len);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        entries.touch(key);
        let value = entries.slot(key).map(|slot| slot.value.clone());
        drop(entries);
        self.hits.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_lookup("hit");
        value
    }

    /// Insert or replace `key` with an explicit ttl.
    pub fn put(&self, key: impl Into<String>, value: Entity, ttl: Duration) {
        if self.max_entries == 0 {
            return;
        }
        let entries = self.entries.lock();
        self.insert(entries, key.into(), value, ttl);
    }

    /// Invalidation counter, to be read before fetching a value that will be
    /// passed to [`CacheLayer::put_if_current`].
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Insert with the default ttl unless an invalidation happened since
    /// `generation` was read. Returns whether the value was stored.
    pub fn put_if_current(&self, key: impl Into<String>, value: Entity, generation: u64) -> bool {
        if self.max_entries == 0 {
            return false;
        }
        let key = key.into();
        let entries = self.entries.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            drop(entries);
            debug!(key = %key, "Skipped caching a value fetched before an invalidation");
            return false;
        }
        self.insert(entries, key, value, self.default_ttl);
        true
    }

    fn insert(&self, mut entries: MutexGuard<'_, LruList>, key: String, value: Entity, ttl: Duration) {
        let now = Instant::now();
        let mut evicted = 0usize;
        if entries.slot(&key).is_none() {
            while entries.len() >= self.max_entries {
                match entries.pop_lru() {
                    Some(slot) => {
                        debug!(key = %slot.key, "Cache eviction (capacity)");
                        evicted += 1;
                    }
                    None => break,
                }
            }
        }
        entries.upsert(key, value, ttl, now);
        let len = entries.len();
        drop(entries);

        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            crate::metrics::record_cache_eviction("capacity", evicted);
        }
        crate::metrics::set_cache_entries(len);
    }

    /// Insert or replace `key` with the default ttl.
    pub fn put_default(&self, key: impl Into<String>, value: Entity) {
        self.put(key, value, self.default_ttl);
    }

    /// Drop `key` if present.
    pub fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let removed = entries.remove(key).is_some();
        drop(entries);
        if removed {
            debug!(key, "Cache entry invalidated");
        }
    }

    /// Drop every key starting with `prefix`. Returns how many were removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let keys = entries.keys_where(|slot| slot.key.starts_with(prefix));
        for key in &keys {
            entries.remove(key);
        }
        let len = entries.len();
        drop(entries);
        crate::metrics::set_cache_entries(len);
        debug!(prefix, removed = keys.len(), "Cache prefix invalidated");
        keys.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
        drop(entries);
        crate::metrics::set_cache_entries(0);
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let keys = entries.keys_where(|slot| slot.is_expired(now));
        for key in &keys {
            entries.remove(key);
        }
        let len = entries.len();
        drop(entries);

        if !keys.is_empty() {
            self.expirations.fetch_add(keys.len() as u64, Ordering::Relaxed);
            crate::metrics::record_cache_eviction("ttl", keys.len());
        }
        crate::metrics::set_cache_entries(len);
        keys.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.len(),
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_lookup("miss");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(id: &str) -> Entity {
        Entity::new(id, json!({"id": id}))
    }

    #[test]
    fn test_get_miss_returns_none() {
        let cache = CacheLayer::new(4, Duration::from_secs(60));

        assert!(cache.get("missing").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_put_and_get_hit() {
        let cache = CacheLayer::new(4, Duration::from_secs(60));
        cache.put_default("a", entity("a"));

        assert_eq!(cache.get("a").unwrap().id, "a");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_capacity_evicts_least_recently_inserted() {
        let cache = CacheLayer::new(2, Duration::from_secs(60));
        cache.put_default("A", entity("A"));
        cache.put_default("B", entity("B"));
        cache.put_default("C", entity("C"));

        assert!(cache.get("A").is_none());
        assert!(cache.get("B").is_some());
        assert!(cache.get("C").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_access_protects_from_eviction() {
        let cache = CacheLayer::new(2, Duration::from_secs(60));
        cache.put_default("A", entity("A"));
        cache.put_default("B", entity("B"));

        assert!(cache.get("A").is_some());
        cache.put_default("C", entity("C"));

        assert!(cache.get("A").is_some());
        assert!(cache.get("B").is_none());
    }

    #[test]
    fn test_replacing_existing_key_does_not_evict() {
        let cache = CacheLayer::new(2, Duration::from_secs(60));
        cache.put_default("A", entity("A"));
        cache.put_default("B", entity("B"));
        cache.put_default("A", Entity::new("A", json!({"v": 2})));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("A").unwrap().payload, json!({"v": 2}));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = CacheLayer::new(0, Duration::from_secs(60));
        cache.put_default("A", entity("A"));

        assert!(cache.is_empty());
        assert!(cache.get("A").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss() {
        let cache = CacheLayer::new(4, Duration::from_secs(60));
        cache.put("A", entity("A"), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(cache.get("A").is_none());
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_alive_until_ttl() {
        let cache = CacheLayer::new(4, Duration::from_secs(60));
        cache.put("A", entity("A"), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(4)).await;

        assert!(cache.get("A").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired() {
        let cache = CacheLayer::new(8, Duration::from_secs(60));
        cache.put("short-1", entity("short-1"), Duration::from_secs(1));
        cache.put("short-2", entity("short-2"), Duration::from_secs(1));
        cache.put("long", entity("long"), Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.sweep_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").is_some());
    }

    #[test]
    fn test_invalidate() {
        let cache = CacheLayer::new(4, Duration::from_secs(60));
        cache.put_default("A", entity("A"));

        cache.invalidate("A");
        cache.invalidate("never-there");

        assert!(cache.get("A").is_none());
    }

    #[test]
    fn test_put_if_current_skips_after_invalidation() {
        let cache = CacheLayer::new(4, Duration::from_secs(60));
        let before = cache.generation();

        // A write invalidated "A" while its old value was being fetched
        cache.invalidate("A");

        assert!(!cache.put_if_current("A", entity("A"), before));
        assert!(cache.get("A").is_none());
        assert!(cache.put_if_current("A", entity("A"), cache.generation()));
        assert!(cache.get("A").is_some());
    }

    #[test]
    fn test_invalidate_prefix() {
        let cache = CacheLayer::new(8, Duration::from_secs(60));
        cache.put_default("list.1", entity("list.1"));
        cache.put_default("list.2", entity("list.2"));
        cache.put_default("item.1", entity("item.1"));

        assert_eq!(cache.invalidate_prefix("list."), 2);
        assert!(cache.get("item.1").is_some());
        assert!(cache.get("list.1").is_none());
    }

    #[test]
    fn test_clear() {
        let cache = CacheLayer::new(8, Duration::from_secs(60));
        cache.put_default("A", entity("A"));
        cache.put_default("B", entity("B"));

        cache.clear();

        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;

        let cache = Arc::new(CacheLayer::new(64, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("t{}-{}", t, i % 16);
                        cache.put_default(key.clone(), entity(&key));
                        let _ = cache.get(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 64);
    }
}
