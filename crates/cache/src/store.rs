//! Bounded LRU store with TTL expiry.
//!
//! Pure bookkeeping — no IO. The caller ([`service`](crate::service)) does
//! the resolving and hands successful payloads in. Uses [`tokio::time::Instant`]
//! so the paused test clock drives expiry deterministically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Bounds for a [`CacheStore`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of resident entries.
    pub max_entries: usize,
    /// Maximum total resident payload bytes.
    pub max_bytes: u64,
    /// Entries older than this are never handed to a caller.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            max_bytes: 256 * 1024 * 1024,
            ttl: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Entries and stats
// ---------------------------------------------------------------------------

/// One resident payload.
#[derive(Debug)]
struct Entry {
    payload: Arc<Vec<u8>>,
    size_bytes: u64,
    inserted_at: Instant,
    last_access_at: Instant,
    access_count: u64,
}

/// Counters exposed to the UI's cache statistics view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub current_count: usize,
    pub current_bytes: u64,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Bounded, expiring payload store keyed by locator.
///
/// Invariant: after every insert, `current_count <= max_entries` and
/// `current_bytes <= max_bytes`. Expired entries are dropped lazily on
/// lookup, or eagerly by [`sweep_expired`](Self::sweep_expired).
#[derive(Debug)]
pub struct CacheStore {
    config: CacheConfig,
    entries: HashMap<String, Entry>,
    total_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            total_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up a payload, dropping it first if it has outlived the TTL.
    ///
    /// A fresh entry is touched (access time + count) and counted as a hit;
    /// anything else counts as a miss.
    pub fn get(&mut self, key: &str) -> Option<Arc<Vec<u8>>> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if now.duration_since(entry.inserted_at) >= self.config.ttl {
                self.remove(key);
                self.misses += 1;
                return None;
            }
        }

        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access_at = now;
                entry.access_count += 1;
                self.hits += 1;
                Some(Arc::clone(&entry.payload))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a payload, then evict least-recently-accessed entries until
    /// both bounds hold again.
    ///
    /// A payload larger than half the byte budget is never stored (one item
    /// must not flush the entire cache); returns `false` in that case.
    pub fn insert(&mut self, key: &str, payload: Arc<Vec<u8>>) -> bool {
        let size_bytes = payload.len() as u64;
        if size_bytes * 2 > self.config.max_bytes {
            tracing::debug!(
                key,
                size_bytes,
                max_bytes = self.config.max_bytes,
                "Payload exceeds half the cache byte budget, not storing",
            );
            return false;
        }

        // Replacing an existing entry first, so byte accounting stays exact.
        self.remove(key);

        let now = Instant::now();
        self.entries.insert(
            key.to_string(),
            Entry {
                payload,
                size_bytes,
                inserted_at: now,
                last_access_at: now,
                access_count: 0,
            },
        );
        self.total_bytes += size_bytes;

        while self.entries.len() > self.config.max_entries
            || self.total_bytes > self.config.max_bytes
        {
            if !self.evict_lru() {
                break;
            }
        }

        true
    }

    /// Drop one entry by key. Returns whether it was present.
    pub fn invalidate(&mut self, key: &str) -> bool {
        self.remove(key)
    }

    /// Drop every entry. Counters are kept (they describe lifetime totals).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    /// Eagerly drop all entries past the TTL. Returns how many were dropped.
    pub fn sweep_expired(&mut self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.inserted_at) >= ttl)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Whether a fresh (unexpired) entry exists, without touching it.
    pub fn contains_fresh(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(entry) => Instant::now().duration_since(entry.inserted_at) < self.config.ttl,
            None => false,
        }
    }

    /// Current counters and occupancy.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            current_count: self.entries.len(),
            current_bytes: self.total_bytes,
        }
    }

    // ---- private helpers ----

    fn remove(&mut self, key: &str) -> bool {
        if let Some(entry) = self.entries.remove(key) {
            self.total_bytes -= entry.size_bytes;
            true
        } else {
            false
        }
    }

    /// Evict the least-recently-accessed entry. Returns whether one existed.
    fn evict_lru(&mut self) -> bool {
        let lru_key = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access_at)
            .map(|(k, _)| k.clone());

        match lru_key {
            Some(key) => {
                self.remove(&key);
                self.evictions += 1;
                tracing::debug!(key = %key, "Evicted least-recently-accessed cache entry");
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max_entries: usize, max_bytes: u64, ttl_secs: u64) -> CacheStore {
        CacheStore::new(CacheConfig {
            max_entries,
            max_bytes,
            ttl: Duration::from_secs(ttl_secs),
        })
    }

    fn payload(size: usize) -> Arc<Vec<u8>> {
        Arc::new(vec![0u8; size])
    }

    // -- hit/miss accounting -------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn get_miss_then_hit() {
        let mut s = store(4, 100, 60);
        assert!(s.get("a").is_none());
        s.insert("a", payload(10));
        assert!(s.get("a").is_some());

        let stats = s.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    // -- entry-count bound ---------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn third_insert_evicts_lru_entry() {
        let mut s = store(2, 25, 60);
        s.insert("a", payload(10));
        tokio::time::advance(Duration::from_millis(1)).await;
        s.insert("b", payload(10));
        tokio::time::advance(Duration::from_millis(1)).await;

        // Touch "a" so "b" becomes least-recently-accessed.
        assert!(s.get("a").is_some());
        tokio::time::advance(Duration::from_millis(1)).await;

        s.insert("c", payload(10));

        assert!(s.entries.contains_key("a"));
        assert!(!s.entries.contains_key("b"));
        assert!(s.entries.contains_key("c"));

        let stats = s.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.current_count, 2);
        assert!(stats.current_bytes <= 25);
    }

    // -- byte-budget bound ---------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn byte_budget_evicts_until_within_bounds() {
        let mut s = store(10, 25, 60);
        s.insert("a", payload(10));
        tokio::time::advance(Duration::from_millis(1)).await;
        s.insert("b", payload(10));
        tokio::time::advance(Duration::from_millis(1)).await;
        s.insert("c", payload(10));

        let stats = s.stats();
        assert_eq!(stats.current_count, 2);
        assert_eq!(stats.current_bytes, 20);
        assert_eq!(stats.evictions, 1);
        assert!(!s.entries.contains_key("a"));
    }

    // -- oversized payloads --------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn oversized_payload_not_stored() {
        let mut s = store(10, 100, 60);
        assert!(!s.insert("big", payload(51)));
        assert_eq!(s.stats().current_count, 0);

        // Exactly half is still cacheable.
        assert!(s.insert("half", payload(50)));
        assert_eq!(s.stats().current_count, 1);
    }

    // -- TTL expiry ----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn expired_entry_dropped_on_lookup() {
        let mut s = store(4, 100, 60);
        s.insert("a", payload(10));
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(s.get("a").is_none());
        assert_eq!(s.stats().current_count, 0);
        assert_eq!(s.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_only_expired() {
        let mut s = store(4, 100, 60);
        s.insert("old", payload(10));
        tokio::time::advance(Duration::from_secs(40)).await;
        s.insert("new", payload(10));
        tokio::time::advance(Duration::from_secs(25)).await;

        assert_eq!(s.sweep_expired(), 1);
        assert!(!s.entries.contains_key("old"));
        assert!(s.entries.contains_key("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn contains_fresh_respects_ttl() {
        let mut s = store(4, 100, 60);
        s.insert("a", payload(10));
        assert!(s.contains_fresh("a"));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!s.contains_fresh("a"));
    }

    // -- replacement and clearing --------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn reinsert_replaces_bytes_exactly() {
        let mut s = store(4, 100, 60);
        s.insert("a", payload(10));
        s.insert("a", payload(30));
        assert_eq!(s.stats().current_bytes, 30);
        assert_eq!(s.stats().current_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_keeps_lifetime_counters() {
        let mut s = store(4, 100, 60);
        s.insert("a", payload(10));
        assert!(s.get("a").is_some());
        s.clear();

        let stats = s.stats();
        assert_eq!(stats.current_count, 0);
        assert_eq!(stats.current_bytes, 0);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_removes_entry() {
        let mut s = store(4, 100, 60);
        s.insert("a", payload(10));
        assert!(s.invalidate("a"));
        assert!(!s.invalidate("a"));
        assert_eq!(s.stats().current_count, 0);
    }
}
