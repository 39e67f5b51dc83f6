//! TTL-aware memo of catalog lookup outcomes.
//!
//! The cache remembers both hits and misses. Misses expire so catalogs that
//! add a track later get re-checked; hits never expire.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::models::CatalogLookupCacheEntry;
use crate::store::StoreError;

/// Default lifetime of a not-found entry.
pub const NOT_FOUND_TTL_DAYS: i64 = 30;

/// What a cache read returns.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedLookup {
    pub found: bool,
    pub data: Option<Value>,
    pub age: Duration,
}

impl CachedLookup {
    pub fn from_entry(entry: &CatalogLookupCacheEntry, now: DateTime<Utc>) -> Self {
        Self {
            found: entry.found,
            data: entry.catalog_data.clone(),
            age: now - entry.updated_at,
        }
    }
}

/// Key-value store for lookup outcomes. Writes are upserts by key.
pub trait LookupCache {
    fn get(&self, key: &str) -> Result<Option<CachedLookup>, StoreError>;
    fn put(&self, key: &str, found: bool, data: Option<&Value>) -> Result<(), StoreError>;
}

/// How the reconciler should treat a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheDecision {
    /// Known match: apply the cached data, no network call
    Hit(Option<Value>),
    /// Recently confirmed absent: skip the record
    KnownMissing,
    /// Nothing usable cached: query the catalogs
    Miss,
}

pub fn decide(lookup: Option<CachedLookup>, not_found_ttl: Duration) -> CacheDecision {
    match lookup {
        Some(hit) if hit.found => CacheDecision::Hit(hit.data),
        Some(miss) if miss.age < not_found_ttl => CacheDecision::KnownMissing,
        _ => CacheDecision::Miss,
    }
}

/// In-process cache, used by tests and single-run tooling.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<FxHashMap<String, CatalogLookupCacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed entry, including its timestamp.
    pub fn insert_entry(&self, entry: CatalogLookupCacheEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(entry.lookup_key.clone(), entry);
    }

    pub fn entry(&self, key: &str) -> Option<CatalogLookupCacheEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LookupCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<CachedLookup>, StoreError> {
        let now = Utc::now();
        Ok(self.entry(key).map(|e| CachedLookup::from_entry(&e, now)))
    }

    fn put(&self, key: &str, found: bool, data: Option<&Value>) -> Result<(), StoreError> {
        self.insert_entry(CatalogLookupCacheEntry {
            lookup_key: key.to_string(),
            found,
            catalog_data: data.cloned(),
            updated_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, found: bool, days_old: i64) -> CatalogLookupCacheEntry {
        CatalogLookupCacheEntry {
            lookup_key: key.to_string(),
            found,
            catalog_data: found.then(|| json!({"spotify_id": "abc"})),
            updated_at: Utc::now() - Duration::days(days_old),
        }
    }

    #[test]
    fn test_not_found_entries_expire() {
        let cache = MemoryCache::new();
        cache.insert_entry(entry("old", false, 40));
        cache.insert_entry(entry("recent", false, 10));
        let ttl = Duration::days(NOT_FOUND_TTL_DAYS);

        assert_eq!(decide(cache.get("old").unwrap(), ttl), CacheDecision::Miss);
        assert_eq!(decide(cache.get("recent").unwrap(), ttl), CacheDecision::KnownMissing);
        assert_eq!(decide(cache.get("absent").unwrap(), ttl), CacheDecision::Miss);
    }

    #[test]
    fn test_found_entries_never_expire() {
        let cache = MemoryCache::new();
        cache.insert_entry(entry("hit", true, 4000));
        let decision = decide(cache.get("hit").unwrap(), Duration::days(NOT_FOUND_TTL_DAYS));
        assert_eq!(decision, CacheDecision::Hit(Some(json!({"spotify_id": "abc"}))));
    }

    #[test]
    fn test_put_upserts_by_key() {
        let cache = MemoryCache::new();
        cache.put("k", false, None).unwrap();
        cache.put("k", true, Some(&json!({"deezer_id": "1"}))).unwrap();
        assert_eq!(cache.len(), 1);
        let hit = cache.get("k").unwrap().unwrap();
        assert!(hit.found);
        assert!(hit.age < Duration::minutes(1));
    }
}
