//! Cache Engine (C6)
//!
//! TTL- and idle-based expiry with LRU eviction once `max_size` is exceeded,
//! atomic hit/miss/eviction statistics, and glob-pattern key queries (§4.6).
//! Concurrent readers proceed independently; writers serialize per shard via
//! [`DashMap`]'s internal sharding.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cache configuration (§6 "Cache configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master enable switch; a disabled cache always misses.
    pub enabled: bool,
    /// Default time-to-live for entries that don't specify their own.
    pub ttl_seconds: u64,
    /// Maximum number of entries before LRU eviction kicks in.
    pub max_size: usize,
    /// Prefix applied to keys for namespacing (informational).
    pub key_prefix: String,
    /// Entries not read within this many seconds expire, 0 disables.
    pub max_idle_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            ttl_seconds: 300,
            max_size: 1000,
            key_prefix: String::new(),
            max_idle_seconds: 0,
        }
    }
}

struct Entry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
    max_idle: Duration,
    last_access: Instant,
    access_count: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        let ttl_expired = self.ttl != Duration::ZERO && now.duration_since(self.created_at) > self.ttl;
        let idle_expired =
            self.max_idle != Duration::ZERO && now.duration_since(self.last_access) > self.max_idle;
        ttl_expired || idle_expired
    }
}

/// Atomic cache statistics (§4.6 and §8 property 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Total `get` calls that found a live entry.
    pub hits: u64,
    /// Total `get` calls that found nothing or an expired entry.
    pub misses: u64,
    /// Total `put` calls.
    pub puts: u64,
    /// Total explicit `remove` calls.
    pub removals: u64,
    /// Total entries evicted by TTL/idle expiry or LRU pressure.
    pub evictions: u64,
    /// Current number of live entries.
    pub size: usize,
}

impl CacheStatistics {
    /// `hits / (hits + misses)`, or `0.0` when there have been no reads
    /// (§8 property 4).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A generic TTL/idle/LRU cache keyed by `String`.
pub struct Cache<V: Clone> {
    config: CacheConfig,
    entries: DashMap<String, Entry<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    removals: AtomicU64,
    evictions: AtomicU64,
    shutdown: AtomicBool,
}

impl<V: Clone> Cache<V> {
    /// Build a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Cache {
            config,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            removals: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Insert or replace an entry, using the configured default TTL
    /// (§3 invariant e: `put` replaces an existing key).
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.put_with_ttl(key, value, self.config.ttl_seconds);
    }

    /// Insert or replace an entry with an explicit TTL in seconds (`0` means
    /// never expires by TTL). A no-op after [`Cache::shutdown`].
    pub fn put_with_ttl(&self, key: impl Into<String>, value: V, ttl_seconds: u64) {
        if !self.config.enabled || self.shutdown.load(Ordering::Acquire) {
            return;
        }
        self.puts.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        self.entries.insert(
            key.into(),
            Entry {
                value,
                created_at: now,
                ttl: Duration::from_secs(ttl_seconds),
                max_idle: Duration::from_secs(self.config.max_idle_seconds),
                last_access: now,
                access_count: 0,
            },
        );
        self.enforce_capacity();
    }

    /// Look up a key, updating its access time/count on a live hit and
    /// removing it if found but expired (§3 invariant: a read on an expired
    /// entry removes it).
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.config.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            entry.last_access = now;
            entry.access_count += 1;
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.value.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Remove a key unconditionally.
    pub fn remove(&self, key: &str) -> Option<V> {
        let removed = self.entries.remove(key).map(|(_, e)| e.value);
        if removed.is_some() {
            self.removals.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// `true` iff `key` maps to a live (non-expired) entry.
    pub fn contains_key(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(e) => !e.is_expired(Instant::now()),
            None => false,
        }
    }

    /// Keys matching a glob pattern supporting `*` (any run) and `?` (any
    /// single character).
    pub fn keys_by_pattern(&self, pattern: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|kv| glob_match(pattern, kv.key()))
            .map(|kv| kv.key().clone())
            .collect()
    }

    /// Current number of entries, including any not yet lazily expired.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Stop accepting new entries and drop everything currently cached.
    /// Idempotent; `get`/`contains_key` on a shut-down cache always miss.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.entries.clear();
    }

    /// Scan and remove all expired entries, returning the count removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|kv| kv.value().is_expired(now))
            .map(|kv| kv.key().clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        self.evictions.fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Snapshot the current statistics.
    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }

    /// Evict least-recently-used entries (ties broken by earliest creation)
    /// until the cache is at or under `max_size` (§4.6).
    fn enforce_capacity(&self) {
        if self.config.max_size == 0 || self.entries.len() <= self.config.max_size {
            return;
        }
        let overflow = self.entries.len() - self.config.max_size;
        let mut candidates: Vec<(String, Instant, Instant)> = self
            .entries
            .iter()
            .map(|kv| (kv.key().clone(), kv.value().last_access, kv.value().created_at))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)));
        for (key, _, _) in candidates.into_iter().take(overflow) {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_inner(&p, &t)
}

fn glob_match_inner(p: &[char], t: &[char]) -> bool {
    match (p.first(), t.first()) {
        (None, None) => true,
        (Some('*'), _) => glob_match_inner(&p[1..], t) || (!t.is_empty() && glob_match_inner(p, &t[1..])),
        (Some('?'), Some(_)) => glob_match_inner(&p[1..], &t[1..]),
        (Some(pc), Some(tc)) if pc == tc => glob_match_inner(&p[1..], &t[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn put_then_get_round_trips() {
        let cache = Cache::new(CacheConfig::default());
        cache.put("k", 42);
        assert_eq!(cache.get("k"), Some(42));
    }

    #[test]
    fn put_replaces_existing_value() {
        let cache = Cache::new(CacheConfig::default());
        cache.put("k", 1);
        cache.put("k", 2);
        assert_eq!(cache.get("k"), Some(2));
    }

    #[test]
    fn ttl_zero_never_expires() {
        let cache = Cache::new(CacheConfig { ttl_seconds: 0, ..Default::default() });
        cache.put("k", "v");
        thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), Some("v"));
    }

    #[test]
    fn ttl_expiry_removes_entry_on_read() {
        let cache = Cache::new(CacheConfig { ttl_seconds: 1, ..Default::default() });
        cache.put_with_ttl("k", "v", 0);
        cache.put_with_ttl("k2", "v2", 1);
        thread::sleep(Duration::from_millis(1100));
        assert_eq!(cache.get("k2"), None);
        assert_eq!(cache.statistics().evictions, 1);
    }

    #[test]
    fn hit_rate_is_zero_with_no_requests() {
        let cache: Cache<i32> = Cache::new(CacheConfig::default());
        assert_eq!(cache.statistics().hit_rate(), 0.0);
    }

    #[test]
    fn hit_rate_tracks_hits_and_misses() {
        let cache = Cache::new(CacheConfig::default());
        cache.put("k", 1);
        cache.get("k"); // hit
        cache.get("missing"); // miss
        assert_eq!(cache.statistics().hit_rate(), 0.5);
    }

    #[test]
    fn lru_eviction_when_over_capacity() {
        let cache = Cache::new(CacheConfig { max_size: 2, ttl_seconds: 0, ..Default::default() });
        cache.put("a", 1);
        thread::sleep(Duration::from_millis(2));
        cache.put("b", 2);
        thread::sleep(Duration::from_millis(2));
        cache.put("c", 3);
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn shutdown_clears_entries_and_rejects_further_puts() {
        let cache = Cache::new(CacheConfig::default());
        cache.put("k", 1);
        cache.shutdown();
        assert_eq!(cache.get("k"), None);
        cache.put("k2", 2);
        assert_eq!(cache.get("k2"), None);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let cache: Cache<i32> = Cache::new(CacheConfig::default());
        cache.shutdown();
        cache.shutdown();
    }

    #[test]
    fn glob_pattern_query() {
        let cache = Cache::new(CacheConfig::default());
        cache.put("user:1", 1);
        cache.put("user:2", 2);
        cache.put("order:1", 3);
        let mut keys = cache.keys_by_pattern("user:*");
        keys.sort();
        assert_eq!(keys, vec!["user:1".to_string(), "user:2".to_string()]);
        assert!(cache.keys_by_pattern("user:?").len() == 2);
    }
}
