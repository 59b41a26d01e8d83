//! Cache-aside collaborator.
//!
//! The aggregator only needs `get` / `set` / `delete` keyed by a category and
//! an identifier. [`MemoryCacheStore`] keeps entries in a `moka` cache with a
//! TTL per entry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CacheError;

const DEFAULT_MAX_ENTRIES: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheCategory {
    Quote,
    Historical,
    Search,
}

impl CacheCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheCategory::Quote => "quote",
            CacheCategory::Historical => "historical",
            CacheCategory::Search => "search",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub payload: Value,
    pub cached_at_ms: i64,
    pub ttl_seconds: u64,
}

/// Identifier part of a cache key: upper-cased symbol followed by the
/// optional period and interval.
pub fn cache_key(symbol: &str, period: Option<&str>, interval: Option<&str>) -> String {
    let mut key = symbol.trim().to_ascii_uppercase();
    for part in [period, interval].into_iter().flatten() {
        key.push(':');
        key.push_str(part);
    }
    key
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, category: CacheCategory, key: &str)
        -> Result<Option<CacheEntry>, CacheError>;

    async fn set(
        &self,
        category: CacheCategory,
        key: &str,
        payload: Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn delete(&self, category: CacheCategory, key: &str) -> Result<(), CacheError>;
}

struct PerEntryTtl;

impl Expiry<String, CacheEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(Duration::from_secs(value.ttl_seconds))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(Duration::from_secs(value.ttl_seconds))
    }
}

/// In-process cache store.
#[derive(Clone)]
pub struct MemoryCacheStore {
    entries: Cache<String, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { entries }
    }

    fn full_key(category: CacheCategory, key: &str) -> String {
        format!("{}:{}", category.as_str(), key)
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(
        &self,
        category: CacheCategory,
        key: &str,
    ) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.get(&Self::full_key(category, key)).await)
    }

    async fn set(
        &self,
        category: CacheCategory,
        key: &str,
        payload: Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry {
            payload,
            cached_at_ms: chrono::Utc::now().timestamp_millis(),
            ttl_seconds: ttl.as_secs(),
        };
        self.entries
            .insert(Self::full_key(category, key), entry)
            .await;
        Ok(())
    }

    async fn delete(&self, category: CacheCategory, key: &str) -> Result<(), CacheError> {
        self.entries
            .invalidate(&Self::full_key(category, key))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_shape() {
        assert_eq!(cache_key(" aapl ", None, None), "AAPL");
        assert_eq!(cache_key("msft", Some("1mo"), Some("1d")), "MSFT:1mo:1d");
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryCacheStore::new();
        store
            .set(
                CacheCategory::Quote,
                "AAPL",
                json!({"price": 190.5}),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let entry = store.get(CacheCategory::Quote, "AAPL").await.unwrap().unwrap();
        assert_eq!(entry.payload["price"], 190.5);
        assert_eq!(entry.ttl_seconds, 60);

        // Categories do not collide.
        assert!(store
            .get(CacheCategory::Historical, "AAPL")
            .await
            .unwrap()
            .is_none());

        store.delete(CacheCategory::Quote, "AAPL").await.unwrap();
        assert!(store.get(CacheCategory::Quote, "AAPL").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_expires() {
        let store = MemoryCacheStore::new();
        store
            .set(CacheCategory::Search, "apple", json!([]), Duration::from_secs(0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get(CacheCategory::Search, "apple").await.unwrap().is_none());
    }
}
