//! Result cache
//!
//! Task results are stored under content-addressed keys with a per-category TTL.
//! The store itself is pluggable: a Redis service (TTL enforced server-side) or an
//! embedded SQLite file with an expiry column and a background sweep.

pub mod factory;
pub mod redis_backend;
pub mod result_cache;
pub mod sqlite_backend;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use harvest_errors::HarvestResult;

pub use factory::{create_cache_backend, ConfiguredBackend};
pub use redis_backend::RedisCacheBackend;
pub use result_cache::{cache_key, ResultCache};
pub use sqlite_backend::SqliteCacheBackend;

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        let total_ops = self.hits + self.misses + self.sets + self.deletes;
        if total_ops == 0 {
            0.0
        } else {
            self.errors as f64 / total_ops as f64
        }
    }
}

/// Storage behind the result cache
///
/// Implementations must treat an expired entry as absent on `get`, whether or not
/// it has been physically removed yet.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a raw value, `None` on miss or expiry
    async fn get(&self, key: &str) -> HarvestResult<Option<Vec<u8>>>;

    /// Store a value, overwriting any existing entry under the same key
    async fn set(&self, key: &str, category: &str, value: &[u8], ttl: Duration)
        -> HarvestResult<()>;

    /// Delete a value, returning whether it existed
    async fn delete(&self, key: &str) -> HarvestResult<bool>;

    /// Delete every entry stored under exactly `category`
    async fn clear_category(&self, category: &str) -> HarvestResult<usize>;

    async fn health_check(&self) -> HarvestResult<bool>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}
