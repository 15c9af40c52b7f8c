//! TTL + LRU store for generated responses.
//!
//! # Responsibilities
//! - O(1) get/put with least-recently-used eviction at capacity
//! - Treat expired entries as misses and drop them
//! - Keep cumulative hit/miss/write counters
//!
//! # Design Decisions
//! - A single `parking_lot::Mutex` around `LruCache` keeps the recency order
//!   exact across all keys; critical sections are a hash lookup and a list splice
//! - Payloads are `Arc<str>` so a hit clones a pointer, not the text

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use super::fingerprint::Fingerprint;
use crate::config::CacheConfig;
use crate::observability::metrics;

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Arc<str>,
    created_at: Instant,
}

/// Cache counters and occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

/// Shared response cache.
pub struct ResponseCache {
    entries: Mutex<LruCache<Fingerprint, CacheEntry>>,
    ttl: Duration,
    enabled: bool,
    sweep_interval: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::from_secs(config.ttl_secs),
            enabled: config.enabled,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up a payload; a hit refreshes its recency.
    pub fn get(&self, key: &Fingerprint) -> Option<Arc<str>> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &Fingerprint, now: Instant) -> Option<Arc<str>> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.lock();
        let expired = entries
            .peek(key)
            .map(|entry| now.saturating_duration_since(entry.created_at) >= self.ttl);

        match expired {
            None => {
                drop(entries);
                self.record_miss("miss");
                return None;
            }
            Some(true) => {
                entries.pop(key);
                let size = entries.len();
                drop(entries);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_size(size);
                self.record_miss("expired");
                return None;
            }
            Some(false) => {}
        }

        let payload = entries.get(key).map(|entry| Arc::clone(&entry.payload));
        drop(entries);
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup("hit");
        payload
    }

    fn record_miss(&self, result: &'static str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(result);
    }

    /// Store a payload, evicting the least-recently-used entry when full.
    pub fn put(&self, key: Fingerprint, payload: impl Into<Arc<str>>) {
        self.put_at(key, payload, Instant::now());
    }

    pub fn put_at(&self, key: Fingerprint, payload: impl Into<Arc<str>>, now: Instant) {
        if !self.enabled {
            return;
        }
        let entry = CacheEntry {
            payload: payload.into(),
            created_at: now,
        };
        let mut entries = self.entries.lock();
        let displaced = entries.push(key, entry);
        let size = entries.len();
        drop(entries);

        self.writes.fetch_add(1, Ordering::Relaxed);
        if let Some((old_key, _)) = displaced {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(evicted = %old_key, "Cache entry evicted");
            }
        }
        metrics::record_cache_size(size);
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let expired: Vec<Fingerprint> = entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.created_at) >= self.ttl)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        let size = entries.len();
        drop(entries);

        self.expirations.fetch_add(expired.len() as u64, Ordering::Relaxed);
        metrics::record_cache_size(size);
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.entries.lock().contains(key)
    }

    pub fn stats(&self) -> CacheStats {
        let (size, capacity) = {
            let entries = self.entries.lock();
            (entries.len(), entries.cap().get())
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            size,
            capacity,
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
        }
    }

    /// Periodic sweep until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.enabled {
            return;
        }
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, "Cache sweep");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_entries: usize) -> ResponseCache {
        ResponseCache::new(&CacheConfig {
            max_entries,
            ..CacheConfig::default()
        })
    }

    fn fp(n: u32) -> Fingerprint {
        Fingerprint::compute(&format!("query {n}"), "model", "persona")
    }

    #[test]
    fn hit_returns_identical_payload() {
        let cache = cache(10);
        assert!(cache.get(&fp(1)).is_none());
        cache.put(fp(1), "The answer is 42.");
        assert_eq!(cache.get(&fp(1)).as_deref(), Some("The answer is 42."));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.writes), (1, 1, 1));
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn evicts_least_recently_accessed() {
        let cache = cache(3);
        cache.put(fp(1), "one");
        cache.put(fp(2), "two");
        cache.put(fp(3), "three");
        // Touch 1 so 2 becomes the oldest.
        assert!(cache.get(&fp(1)).is_some());
        cache.put(fp(4), "four");

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&fp(2)));
        assert!(cache.contains(&fp(1)));
        assert!(cache.contains(&fp(3)));
        assert!(cache.contains(&fp(4)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn never_exceeds_capacity() {
        let cache = cache(5);
        for n in 0..50 {
            cache.put(fp(n), "x");
            assert!(cache.len() <= 5);
        }
        assert_eq!(cache.stats().evictions, 45);
    }

    #[test]
    fn overwrite_is_not_an_eviction() {
        let cache = cache(2);
        cache.put(fp(1), "a");
        cache.put(fp(1), "b");
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&fp(1)).as_deref(), Some("b"));
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = cache(10);
        let now = Instant::now();
        cache.put_at(fp(1), "old", now);
        assert!(cache.get_at(&fp(1), now + Duration::from_secs(3599)).is_some());
        assert!(cache.get_at(&fp(1), now + Duration::from_secs(3600)).is_none());
        assert!(!cache.contains(&fp(1)));
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let cache = cache(10);
        let now = Instant::now();
        cache.put_at(fp(1), "old", now);
        cache.put_at(fp(2), "new", now + Duration::from_secs(1800));
        assert_eq!(cache.sweep_at(now + Duration::from_secs(3700)), 1);
        assert!(cache.contains(&fp(2)));
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let cache = ResponseCache::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.put(fp(1), "x");
        assert!(cache.get(&fp(1)).is_none());
        assert!(cache.is_empty());
    }
}
