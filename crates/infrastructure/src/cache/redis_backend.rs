//! Redis cache backend

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, error, info, instrument};

use harvest_config::RedisCacheConfig;
use harvest_errors::{HarvestError, HarvestResult};

use super::result_cache::KEY_DIGEST_LEN;
use super::CacheBackend;

/// Redis-backed store; expiry is left to the server via `PSETEX`
#[derive(Clone)]
pub struct RedisCacheBackend {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisCacheBackend {
    /// Connect and verify the server answers `PING`
    pub async fn connect(config: &RedisCacheConfig) -> HarvestResult<Self> {
        info!("Creating Redis cache backend with URL: {}", config.url);

        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| HarvestError::cache_error(e.to_string()))?;

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let mut connection = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| {
                HarvestError::cache_error(format!("Redis connection timed out after {timeout:?}"))
            })?
            .map_err(|e| HarvestError::cache_error(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| HarvestError::cache_error(e.to_string()))?;

        info!("Redis cache backend connected");
        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone().unwrap_or_default(),
        })
    }

    fn build_key(&self, key: &str) -> String {
        prefixed_key(&self.key_prefix, key)
    }
}

/// Full key with the instance prefix
pub(crate) fn prefixed_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}:{key}")
    }
}

/// SCAN pattern matching exactly the keys of one category
///
/// The digest part is matched by length so `news` never picks up keys of `news:sports`.
pub(crate) fn category_pattern(prefix: &str, category: &str) -> String {
    let pattern = format!("{}:{}", escape_glob(category), "?".repeat(KEY_DIGEST_LEN));
    prefixed_key(&escape_glob(prefix), &pattern)
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\' | '^') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn redis_error(op: &str, key: &str, e: redis::RedisError) -> HarvestError {
    error!("Cache {} failed for key {}: {}", op, key, e);
    HarvestError::cache_error(e.to_string())
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> HarvestResult<Option<Vec<u8>>> {
        let full_key = self.build_key(key);
        let mut conn = self.connection.clone();

        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("GET", &full_key, e))?;

        debug!(
            "Cache {}: {}",
            if value.is_some() { "HIT" } else { "MISS" },
            full_key
        );
        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn set(
        &self,
        key: &str,
        category: &str,
        value: &[u8],
        ttl: Duration,
    ) -> HarvestResult<()> {
        let full_key = self.build_key(key);
        let mut conn = self.connection.clone();
        // PSETEX rejects a zero expiry
        let ttl_ms = ttl.as_millis().clamp(1, i64::MAX as u128) as i64;

        let _: () = redis::cmd("PSETEX")
            .arg(&full_key)
            .arg(ttl_ms)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("SET", &full_key, e))?;

        debug!("Cache SET: {} with TTL: {:?}", full_key, ttl);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> HarvestResult<bool> {
        let full_key = self.build_key(key);
        let mut conn = self.connection.clone();

        let removed: i64 = redis::cmd("DEL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("DELETE", &full_key, e))?;

        Ok(removed > 0)
    }

    #[instrument(skip(self))]
    async fn clear_category(&self, category: &str) -> HarvestResult<usize> {
        let pattern = category_pattern(&self.key_prefix, category);
        let mut conn = self.connection.clone();

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("SCAN", &pattern, e))?;
            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        if keys.is_empty() {
            debug!("No keys found for category: {}", category);
            return Ok(0);
        }

        let mut deleted = 0usize;
        for chunk in keys.chunks(100) {
            let removed: usize = redis::cmd("DEL")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("DELETE", &pattern, e))?;
            deleted += removed;
        }

        debug!("Cache CLEAR_CATEGORY {}: {} keys deleted", category, deleted);
        Ok(deleted)
    }

    async fn health_check(&self) -> HarvestResult<bool> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("PING", "-", e))?;
        Ok(pong == "PONG")
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
