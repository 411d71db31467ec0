//! Model response cache with TTL expiry and optional LRU bound.
//!
//! Entries are keyed by a [`fingerprint`] of `(feature, user, payload)`.
//! The document is reloaded from its store under the lock before every
//! operation and written back after every mutation, so several instances
//! sharing one file see each other's entries. Hit bookkeeping stays in
//! memory until the next write. The cache is an optimization only: a store
//! that cannot be read falls back to the in-memory copy, and a failed write
//! is logged and ignored, so callers always get at worst a miss.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, GovernorConfig};
use crate::error::{GovernorError, Result};
use crate::storage::{DocumentStore, JsonFileStore};

use super::fingerprint::fingerprint;

/// A single cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The model response text.
    pub response_text: String,
    /// Feature that produced the response, for reporting.
    #[serde(default)]
    pub feature: String,
    /// Unix timestamp when the entry was created.
    pub created_at: u64,
    /// Unix timestamp when the entry was last read.
    pub accessed_at: u64,
    /// Number of cache hits for this entry.
    #[serde(default)]
    pub hit_count: u32,
    /// Size of `response_text` in bytes.
    pub size_bytes: u64,
}

/// Persisted form of the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheDocument {
    pub entries: HashMap<String, CacheEntry>,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of entries currently in the cache.
    pub total_entries: usize,
    /// Sum of cached response sizes in bytes.
    pub approximate_size_bytes: u64,
    /// Cumulative number of hits across all entries.
    pub total_hits: u64,
}

impl CacheStats {
    pub fn approximate_size_mb(&self) -> f64 {
        self.approximate_size_bytes as f64 / (1024.0 * 1024.0)
    }
}

struct Inner {
    doc: CacheDocument,
    store: Box<dyn DocumentStore<CacheDocument>>,
}

/// Response cache with TTL expiry, optional LRU eviction and persistence.
pub struct ResponseCache {
    inner: Mutex<Inner>,
    ttl_secs: u64,
    max_entries: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    /// Create a cache over `store`. Fails if the TTL or the entry bound is zero.
    pub fn new(
        config: &CacheConfig,
        store: Box<dyn DocumentStore<CacheDocument>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.ttl_secs == 0 {
            return Err(GovernorError::Config(
                "cache.ttl_secs must be greater than zero".into(),
            ));
        }
        if config.max_entries == Some(0) {
            return Err(GovernorError::Config(
                "cache.max_entries must be greater than zero when set".into(),
            ));
        }

        let doc = match store.load() {
            Ok(Some(doc)) => doc,
            Ok(None) => CacheDocument::default(),
            Err(e) => {
                warn!("Response cache unreadable, starting empty: {e}");
                CacheDocument::default()
            }
        };

        Ok(Self {
            inner: Mutex::new(Inner { doc, store }),
            ttl_secs: config.ttl_secs,
            max_entries: config.max_entries,
            clock,
        })
    }

    /// File-backed cache at the configured data directory.
    pub fn from_config(config: &GovernorConfig) -> Result<Self> {
        Self::new(
            &config.cache,
            Box::new(JsonFileStore::new(config.cache_path())),
            Arc::new(SystemClock),
        )
    }

    /// Look up a cached response. `None` if absent or expired.
    pub fn get(&self, feature: &str, user_id: Option<&str>, payload: &Value) -> Option<String> {
        self.get_by_key(&fingerprint(feature, user_id, payload))
    }

    /// Store `response_text`, replacing any entry with the same fingerprint.
    pub fn put(&self, feature: &str, user_id: Option<&str>, payload: &Value, response_text: &str) {
        let key = fingerprint(feature, user_id, payload);
        self.put_by_key(key, feature, response_text);
    }

    /// Look up by a precomputed fingerprint.
    ///
    /// On hit, updates `accessed_at` and `hit_count` in memory only; they are
    /// flushed with the next write. An expired entry is removed on sight.
    pub fn get_by_key(&self, key: &str) -> Option<String> {
        let now = self.clock.now_unix();
        let mut inner = self.current();

        let expired = inner
            .doc
            .entries
            .get(key)
            .map(|e| self.is_expired(e, now))?;

        if expired {
            debug!(key = %short(key), "Cache entry expired, removing");
            inner.doc.entries.remove(key);
            save(&inner);
            return None;
        }

        let entry = inner.doc.entries.get_mut(key)?;
        entry.accessed_at = now;
        entry.hit_count = entry.hit_count.saturating_add(1);
        debug!(key = %short(key), feature = %entry.feature, "Cache hit");
        Some(entry.response_text.clone())
    }

    /// Store under a precomputed fingerprint.
    ///
    /// Evicts expired entries first, then least-recently-used entries if a
    /// bound is configured and reached.
    pub fn put_by_key(&self, key: String, feature: &str, response_text: &str) {
        let now = self.clock.now_unix();
        let mut inner = self.current();

        self.evict_expired(&mut inner.doc, now);
        if let Some(max) = self.max_entries {
            while inner.doc.entries.len() >= max && !inner.doc.entries.contains_key(&key) {
                if !evict_lru(&mut inner.doc) {
                    break;
                }
            }
        }

        inner.doc.entries.insert(
            key,
            CacheEntry {
                response_text: response_text.to_string(),
                feature: feature.to_string(),
                created_at: now,
                accessed_at: now,
                hit_count: 0,
                size_bytes: response_text.len() as u64,
            },
        );
        save(&inner);
    }

    /// Aggregate statistics over the current entry set.
    pub fn stats(&self) -> CacheStats {
        let inner = self.current();
        let entries = inner.doc.entries.values();
        CacheStats {
            total_entries: inner.doc.entries.len(),
            approximate_size_bytes: entries.clone().map(|e| e.size_bytes).sum(),
            total_hits: entries.map(|e| u64::from(e.hit_count)).sum(),
        }
    }

    /// Drop expired entries now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_unix();
        let mut inner = self.current();
        let removed = self.evict_expired(&mut inner.doc, now);
        if removed > 0 {
            save(&inner);
        }
        removed
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.doc.entries.clear();
        save(&inner);
    }

    /// Number of entries, including ones that expired but were not yet evicted.
    pub fn len(&self) -> usize {
        self.current().doc.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().doc.entries.is_empty()
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    // -- private helpers ---------------------------------------------------

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock, then replace the in-memory document with the stored one.
    fn current(&self) -> std::sync::MutexGuard<'_, Inner> {
        let mut inner = self.lock();
        match inner.store.load() {
            Ok(Some(mut stored)) => {
                carry_hits(&inner.doc, &mut stored);
                inner.doc = stored;
            }
            Ok(None) => inner.doc = CacheDocument::default(),
            Err(e) => warn!("Response cache unreadable, using in-memory copy: {e}"),
        }
        inner
    }

    fn is_expired(&self, entry: &CacheEntry, now: u64) -> bool {
        now.saturating_sub(entry.created_at) >= self.ttl_secs
    }

    fn evict_expired(&self, doc: &mut CacheDocument, now: u64) -> usize {
        let before = doc.entries.len();
        doc.entries.retain(|_, e| !self.is_expired(e, now));
        before - doc.entries.len()
    }
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl_secs", &self.ttl_secs)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

fn evict_lru(doc: &mut CacheDocument) -> bool {
    let Some(lru_key) = doc
        .entries
        .iter()
        .min_by_key(|(_, e)| e.accessed_at)
        .map(|(k, _)| k.clone())
    else {
        return false;
    };
    debug!(key = %short(&lru_key), "Evicting LRU cache entry");
    doc.entries.remove(&lru_key);
    true
}

/// Keep unflushed hit bookkeeping for entries the store still holds
/// unchanged. An entry rewritten elsewhere takes the stored values.
fn carry_hits(memory: &CacheDocument, stored: &mut CacheDocument) {
    for (key, entry) in stored.entries.iter_mut() {
        if let Some(seen) = memory.entries.get(key) {
            if seen.created_at == entry.created_at && seen.response_text == entry.response_text {
                entry.hit_count = entry.hit_count.max(seen.hit_count);
                entry.accessed_at = entry.accessed_at.max(seen.accessed_at);
            }
        }
    }
}

fn save(inner: &Inner) {
    if let Err(e) = inner.store.save(&inner.doc) {
        warn!("Failed to save response cache: {e}");
    }
}

fn short(key: &str) -> &str {
    &key[..8.min(key.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    mockall::mock! {
        Store {}
        impl DocumentStore<CacheDocument> for Store {
            fn load(&self) -> Result<Option<CacheDocument>>;
            fn save(&self, doc: &CacheDocument) -> Result<()>;
        }
    }

    fn config(ttl_secs: u64, max_entries: Option<usize>) -> CacheConfig {
        CacheConfig {
            ttl_secs,
            max_entries,
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::at_date(2026, 3, 9).unwrap())
    }

    fn test_cache(clock: Arc<ManualClock>) -> ResponseCache {
        ResponseCache::new(&config(3600, Some(5)), Box::new(MemoryStore::new()), clock).unwrap()
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let result = ResponseCache::new(&config(0, None), Box::new(MemoryStore::new()), clock());
        assert!(matches!(result, Err(GovernorError::Config(_))));
    }

    #[test]
    fn test_zero_max_entries_rejected() {
        let result =
            ResponseCache::new(&config(60, Some(0)), Box::new(MemoryStore::new()), clock());
        assert!(result.is_err());
    }

    #[test]
    fn test_cache_hit_miss() {
        let cache = test_cache(clock());
        let payload = json!({"mood": 7});
        assert!(cache.get("greeting", Some("alice"), &payload).is_none());
        cache.put("greeting", Some("alice"), &payload, "Good morning!");
        assert_eq!(
            cache.get("greeting", Some("alice"), &payload),
            Some("Good morning!".into())
        );
    }

    #[test]
    fn test_cache_hit_ignores_key_order() {
        let cache = test_cache(clock());
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        cache.put("greeting", None, &a, "hi");
        assert_eq!(cache.get("greeting", None, &b), Some("hi".into()));
    }

    #[test]
    fn test_cache_miss_for_other_user() {
        let cache = test_cache(clock());
        let payload = json!({"a": 1});
        cache.put("greeting", Some("alice"), &payload, "hi alice");
        assert!(cache.get("greeting", Some("bob"), &payload).is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let cache = test_cache(clock());
        let payload = json!({"a": 1});
        cache.put("greeting", None, &payload, "first");
        cache.put("greeting", None, &payload, "second");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("greeting", None, &payload), Some("second".into()));
    }

    #[test]
    fn test_cache_ttl_expiry() {
        let clock = clock();
        let cache = test_cache(clock.clone());
        let payload = json!({"week": 12});
        cache.put("weekly_summary", None, &payload, "summary");

        clock.advance(Duration::seconds(3599));
        assert!(cache.get("weekly_summary", None, &payload).is_some());

        clock.advance(Duration::seconds(1));
        assert!(cache.get("weekly_summary", None, &payload).is_none());
        assert!(cache.is_empty(), "expired entry is evicted on read");
    }

    #[test]
    fn test_purge_expired() {
        let clock = clock();
        let cache = test_cache(clock.clone());
        cache.put("f", None, &json!(1), "old");
        clock.advance(Duration::seconds(1800));
        cache.put("f", None, &json!(2), "new");
        clock.advance(Duration::seconds(1800));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn test_cache_lru_eviction() {
        let clock = clock();
        let cache = test_cache(clock.clone()); // max 5 entries
        for i in 0..5 {
            cache.put_by_key(format!("k{i}"), "f", &format!("v{i}"));
            clock.advance(Duration::seconds(1));
        }
        // Touch k0 so k1 becomes least recently used.
        assert!(cache.get_by_key("k0").is_some());
        clock.advance(Duration::seconds(1));

        cache.put_by_key("k5".into(), "f", "v5");
        assert_eq!(cache.len(), 5, "should stay at max capacity");
        assert!(cache.get_by_key("k0").is_some());
        assert!(cache.get_by_key("k1").is_none(), "k1 should be evicted");
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let cache = test_cache(clock());
        for i in 0..5 {
            cache.put_by_key(format!("k{i}"), "f", "v");
        }
        cache.put_by_key("k3".into(), "f", "v2");
        assert_eq!(cache.len(), 5);
        assert!(cache.get_by_key("k0").is_some());
    }

    #[test]
    fn test_unbounded_without_max_entries() {
        let cache =
            ResponseCache::new(&config(3600, None), Box::new(MemoryStore::new()), clock()).unwrap();
        for i in 0..50 {
            cache.put_by_key(format!("k{i}"), "f", "v");
        }
        assert_eq!(cache.len(), 50);
    }

    #[test]
    fn test_cache_stats() {
        let cache = test_cache(clock());
        cache.put_by_key("k1".into(), "greeting", "hello");
        cache.put_by_key("k2".into(), "greeting", "hi");
        let _ = cache.get_by_key("k1");
        let _ = cache.get_by_key("k1");
        let _ = cache.get_by_key("k2");
        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.approximate_size_bytes, 7);
        assert_eq!(stats.total_hits, 3);
        assert!(stats.approximate_size_mb() < 0.001);
    }

    #[test]
    fn test_cache_clear() {
        let cache = test_cache(clock());
        cache.put_by_key("k1".into(), "f", "r1");
        cache.clear();
        assert_eq!(cache.stats().total_entries, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("responses.json");
        let clock = clock();
        let payload = json!({"topic": "rust"});
        {
            let cache = ResponseCache::new(
                &config(3600, None),
                Box::new(JsonFileStore::new(&path)),
                clock.clone(),
            )
            .unwrap();
            cache.put("news_summary", None, &payload, "Rust 2.0 released");
        }
        let reopened =
            ResponseCache::new(&config(3600, None), Box::new(JsonFileStore::new(&path)), clock)
                .unwrap();
        assert_eq!(
            reopened.get("news_summary", None, &payload),
            Some("Rust 2.0 released".into())
        );
    }

    #[test]
    fn test_instances_sharing_a_file_keep_each_others_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("responses.json");
        let clock = clock();
        let open = || {
            ResponseCache::new(
                &config(3600, None),
                Box::new(JsonFileStore::new(&path)),
                clock.clone(),
            )
            .unwrap()
        };
        let a = open();
        let b = open();

        a.put_by_key("x".into(), "greeting", "from a");
        b.put_by_key("y".into(), "greeting", "from b");
        let reader = open();
        assert_eq!(reader.get_by_key("x"), Some("from a".into()));
        assert_eq!(reader.get_by_key("y"), Some("from b".into()));

        // Clearing through one instance is not undone by another's next write.
        open().clear();
        a.put_by_key("z".into(), "greeting", "after clear");
        let reader = open();
        assert_eq!(reader.len(), 1);
        assert!(reader.get_by_key("x").is_none());
        assert!(b.get_by_key("y").is_none());
    }

    #[test]
    fn test_hits_survive_reload_until_flushed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("responses.json");
        let cache =
            ResponseCache::new(&config(3600, None), Box::new(JsonFileStore::new(&path)), clock())
                .unwrap();
        cache.put_by_key("k".into(), "greeting", "hello");
        assert!(cache.get_by_key("k").is_some());
        assert!(cache.get_by_key("k").is_some());
        assert_eq!(cache.stats().total_hits, 2);

        cache.put_by_key("other".into(), "greeting", "hi");
        let stored: CacheDocument = JsonFileStore::<CacheDocument>::new(&path)
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(stored.entries["k"].hit_count, 2);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("responses.json");
        std::fs::write(&path, "not json").unwrap();
        let cache =
            ResponseCache::new(&config(3600, None), Box::new(JsonFileStore::new(&path)), clock())
                .unwrap();
        assert!(cache.is_empty());
        cache.put_by_key("k".into(), "f", "v");
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"k\""));
    }

    #[test]
    fn test_store_failures_degrade_to_memory() {
        let mut store = MockStore::new();
        store
            .expect_load()
            .returning(|| Err(GovernorError::Io(std::io::Error::other("unavailable"))));
        store
            .expect_save()
            .returning(|_| Err(GovernorError::Io(std::io::Error::other("read-only"))));

        let cache = ResponseCache::new(&config(3600, None), Box::new(store), clock()).unwrap();
        let payload = json!({"a": 1});
        cache.put("greeting", None, &payload, "still works");
        assert_eq!(cache.get("greeting", None, &payload), Some("still works".into()));
    }
}
