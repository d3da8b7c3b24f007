//! Result cache facade: key derivation, TTL resolution and statistics

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use harvest_config::CacheConfig;
use harvest_errors::HarvestResult;

use super::{CacheBackend, CacheStats};

/// Length of the hex digest that follows `category:` in every storage key
pub const KEY_DIGEST_LEN: usize = 64;

/// Derive the storage key for a category and its key material
///
/// The material is serialized to JSON with object keys sorted at every level,
/// then hashed with SHA-256, so equal parameters map to the same key no matter
/// how the caller built them.
pub fn cache_key<K: Serialize + ?Sized>(category: &str, key_material: &K) -> HarvestResult<String> {
    let value = serde_json::to_value(key_material)?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{}:{:x}", category, hasher.finalize()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Category-aware cache in front of a [`CacheBackend`]
pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    category_ttls: HashMap<String, Duration>,
    stats: Arc<RwLock<CacheStats>>,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        let category_ttls = config
            .category_ttl_seconds
            .iter()
            .map(|(category, seconds)| (category.clone(), Duration::from_secs(*seconds)))
            .collect();
        Self {
            backend,
            default_ttl: config.default_ttl(),
            category_ttls,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Per-call override, then the category's configured TTL, then the default
    pub fn resolve_ttl(&self, category: &str, override_ttl: Option<Duration>) -> Duration {
        override_ttl
            .or_else(|| self.category_ttls.get(category).copied())
            .unwrap_or(self.default_ttl)
    }

    pub async fn get<K: Serialize + ?Sized>(
        &self,
        category: &str,
        key: &K,
    ) -> HarvestResult<Option<Value>> {
        self.get_typed(category, key).await
    }

    pub async fn set<K: Serialize + ?Sized>(
        &self,
        category: &str,
        key: &K,
        value: &Value,
        ttl: Option<Duration>,
    ) -> HarvestResult<()> {
        self.set_typed(category, key, value, ttl).await
    }

    pub async fn get_typed<K, T>(&self, category: &str, key: &K) -> HarvestResult<Option<T>>
    where
        K: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let storage_key = cache_key(category, key)?;
        let raw = match self.backend.get(&storage_key).await {
            Ok(raw) => raw,
            Err(e) => {
                self.record_error(&storage_key, &e).await;
                return Err(e);
            }
        };

        let Some(bytes) = raw else {
            self.stats.write().await.misses += 1;
            metrics::counter!("harvest_cache_misses_total", "category" => category.to_string())
                .increment(1);
            return Ok(None);
        };

        self.stats.write().await.hits += 1;
        metrics::counter!("harvest_cache_hits_total", "category" => category.to_string())
            .increment(1);
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                self.stats.write().await.errors += 1;
                warn!("Cached value under {} is not decodable: {}", storage_key, e);
                Err(e.into())
            }
        }
    }

    pub async fn set_typed<K, T>(
        &self,
        category: &str,
        key: &K,
        value: &T,
        ttl: Option<Duration>,
    ) -> HarvestResult<()>
    where
        K: Serialize + ?Sized,
        T: Serialize + ?Sized,
    {
        let storage_key = cache_key(category, key)?;
        let bytes = serde_json::to_vec(value)?;
        let ttl = self.resolve_ttl(category, ttl);

        match self.backend.set(&storage_key, category, &bytes, ttl).await {
            Ok(()) => {
                self.stats.write().await.sets += 1;
                debug!("Cached {} ({} bytes, ttl {:?})", storage_key, bytes.len(), ttl);
                Ok(())
            }
            Err(e) => {
                self.record_error(&storage_key, &e).await;
                Err(e)
            }
        }
    }

    pub async fn delete<K: Serialize + ?Sized>(&self, category: &str, key: &K) -> HarvestResult<bool> {
        let storage_key = cache_key(category, key)?;
        match self.backend.delete(&storage_key).await {
            Ok(deleted) => {
                if deleted {
                    self.stats.write().await.deletes += 1;
                }
                Ok(deleted)
            }
            Err(e) => {
                self.record_error(&storage_key, &e).await;
                Err(e)
            }
        }
    }

    /// Remove every entry of a category
    pub async fn clear_category(&self, category: &str) -> HarvestResult<usize> {
        match self.backend.clear_category(category).await {
            Ok(removed) => {
                self.stats.write().await.deletes += removed as u64;
                debug!("Cleared {} entries from category {}", removed, category);
                Ok(removed)
            }
            Err(e) => {
                self.record_error(category, &e).await;
                Err(e)
            }
        }
    }

    pub async fn health_check(&self) -> HarvestResult<bool> {
        self.backend.health_check().await
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    async fn record_error(&self, key: &str, error: &harvest_errors::HarvestError) {
        self.stats.write().await.errors += 1;
        warn!("Cache {} operation on {} failed: {}", self.backend.name(), key, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteCacheBackend;
    use serde_json::json;

    async fn cache() -> ResultCache {
        let backend = SqliteCacheBackend::in_memory().await.unwrap();
        let mut config = CacheConfig::default();
        config.category_ttl_seconds.insert("search".to_string(), 120);
        ResultCache::new(Arc::new(backend), &config)
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        let a = cache_key("search", &json!({"q": "rust", "page": 2, "filters": {"lang": "en", "safe": true}})).unwrap();
        let b = cache_key("search", &json!({"filters": {"safe": true, "lang": "en"}, "page": 2, "q": "rust"})).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("search:"));
        assert_eq!(a.len(), "search:".len() + KEY_DIGEST_LEN);

        let other_category = cache_key("profile", &json!({"q": "rust", "page": 2})).unwrap();
        let other_params = cache_key("search", &json!({"q": "rust", "page": 3})).unwrap();
        assert_ne!(a, other_params);
        assert!(other_category.starts_with("profile:"));
    }

    #[test]
    fn test_canonical_form() {
        let mut out = String::new();
        write_canonical(&json!({"b": [1, {"d": null, "c": "x"}], "a": 1.5}), &mut out);
        assert_eq!(out, r#"{"a":1.5,"b":[1,{"c":"x","d":null}]}"#);
    }

    #[tokio::test]
    async fn test_ttl_resolution_order() {
        let cache = cache().await;
        assert_eq!(
            cache.resolve_ttl("search", Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(cache.resolve_ttl("search", None), Duration::from_secs(120));
        assert_eq!(cache.resolve_ttl("profile", None), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_round_trip_and_stats() {
        let cache = cache().await;
        let key = json!({"q": "rust"});
        assert_eq!(cache.get("search", &key).await.unwrap(), None);

        cache.set("search", &key, &json!({"hits": 42}), None).await.unwrap();
        assert_eq!(cache.get("search", &key).await.unwrap(), Some(json!({"hits": 42})));

        let count: Option<u32> = cache.get_typed("search", &json!({"q": "none"})).await.unwrap();
        assert!(count.is_none());

        assert!(cache.delete("search", &key).await.unwrap());
        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.sets, stats.deletes), (1, 2, 1, 1));
    }

    #[tokio::test]
    async fn test_clear_category() {
        let cache = cache().await;
        for page in 0..3 {
            cache
                .set_typed("search", &json!({"page": page}), &page, None)
                .await
                .unwrap();
        }
        cache.set_typed("profile", "alice", "data", None).await.unwrap();

        assert_eq!(cache.clear_category("search").await.unwrap(), 3);
        let profile: Option<String> = cache.get_typed("profile", "alice").await.unwrap();
        assert_eq!(profile.as_deref(), Some("data"));
    }

    #[tokio::test]
    async fn test_clear_category_leaves_longer_category_alone() {
        let cache = cache().await;
        cache.set("news", &json!({"q": 1}), &json!("front"), None).await.unwrap();
        cache
            .set("news:sports", &json!({"q": 2}), &json!("scores"), None)
            .await
            .unwrap();

        assert_eq!(cache.clear_category("news").await.unwrap(), 1);
        assert_eq!(cache.get("news", &json!({"q": 1})).await.unwrap(), None);
        assert_eq!(
            cache.get("news:sports", &json!({"q": 2})).await.unwrap(),
            Some(json!("scores"))
        );
    }
}
