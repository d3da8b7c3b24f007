//! Result cache configuration

use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Which store backs the result cache
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Networked Redis service, TTL enforced server-side
    Redis,
    /// Embedded SQLite file with an expiry column and background sweep
    Sqlite,
}

impl std::str::FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(CacheBackendKind::Redis),
            "sqlite" => Ok(CacheBackendKind::Sqlite),
            _ => Err(format!(
                "Invalid cache backend: {s}. Valid backends: redis, sqlite"
            )),
        }
    }
}

/// Redis connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedisCacheConfig {
    /// Redis connection URL
    pub url: String,
    /// Key prefix for this instance
    pub key_prefix: Option<String>,
    /// Connection timeout in seconds
    pub connection_timeout_seconds: u64,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: Some("harvest".to_string()),
            connection_timeout_seconds: 5,
        }
    }
}

/// Embedded SQLite settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SqliteCacheConfig {
    /// Database file path
    pub path: String,
    pub max_connections: u32,
    /// Interval between expired-row sweeps
    pub sweep_interval_seconds: u64,
}

impl Default for SqliteCacheConfig {
    fn default() -> Self {
        Self {
            path: "data/harvest-cache.db".to_string(),
            max_connections: 5,
            sweep_interval_seconds: 300,
        }
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Selected backend. Leaving it unset is a startup error.
    pub backend: Option<CacheBackendKind>,
    /// Global fallback TTL
    pub default_ttl_seconds: u64,
    /// Per-category TTL overrides
    pub category_ttl_seconds: HashMap<String, u64>,
    pub redis: RedisCacheConfig,
    pub sqlite: SqliteCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: None,
            default_ttl_seconds: 3600,
            category_ttl_seconds: HashMap::new(),
            redis: RedisCacheConfig::default(),
            sqlite: SqliteCacheConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    /// TTL configured for a category, if any
    pub fn category_ttl(&self, category: &str) -> Option<Duration> {
        self.category_ttl_seconds
            .get(category)
            .map(|seconds| Duration::from_secs(*seconds))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sqlite.sweep_interval_seconds)
    }
}

impl ConfigValidator for CacheConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        let backend = self.backend.ok_or_else(|| {
            crate::ConfigError::Validation(
                "cache.backend must be set to \"redis\" or \"sqlite\"".to_string(),
            )
        })?;

        if self.default_ttl_seconds == 0 {
            return Err(crate::ConfigError::Validation(
                "cache.default_ttl_seconds must be greater than 0".to_string(),
            ));
        }

        for (category, ttl) in &self.category_ttl_seconds {
            if *ttl == 0 {
                return Err(crate::ConfigError::Validation(format!(
                    "cache.category_ttl_seconds.{category} must be greater than 0"
                )));
            }
        }

        match backend {
            CacheBackendKind::Redis => {
                ValidationUtils::validate_not_empty(&self.redis.url, "cache.redis.url")?;
                if !self.redis.url.starts_with("redis://") && !self.redis.url.starts_with("rediss://")
                {
                    return Err(crate::ConfigError::Validation(
                        "cache.redis.url must start with redis:// or rediss://".to_string(),
                    ));
                }
                ValidationUtils::validate_timeout_seconds(
                    self.redis.connection_timeout_seconds,
                    "cache.redis.connection_timeout_seconds",
                )?;
            }
            CacheBackendKind::Sqlite => {
                ValidationUtils::validate_not_empty(&self.sqlite.path, "cache.sqlite.path")?;
                ValidationUtils::validate_count(
                    self.sqlite.max_connections as usize,
                    "cache.sqlite.max_connections",
                )?;
                ValidationUtils::validate_timeout_seconds(
                    self.sqlite.sweep_interval_seconds,
                    "cache.sqlite.sweep_interval_seconds",
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert!(config.backend.is_none());
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.default_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_missing_backend_fails() {
        let config = CacheConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_config_validation() {
        let mut config = CacheConfig {
            backend: Some(CacheBackendKind::Redis),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.redis.url = "http://localhost".to_string();
        assert!(config.validate().is_err());

        config.backend = Some(CacheBackendKind::Sqlite);
        assert!(config.validate().is_ok());

        config.category_ttl_seconds.insert("search".to_string(), 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_category_ttl_lookup() {
        let mut config = CacheConfig::default();
        config.category_ttl_seconds.insert("search".to_string(), 600);
        assert_eq!(config.category_ttl("search"), Some(Duration::from_secs(600)));
        assert_eq!(config.category_ttl("pdf"), None);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("Redis".parse::<CacheBackendKind>(), Ok(CacheBackendKind::Redis));
        assert_eq!("sqlite".parse::<CacheBackendKind>(), Ok(CacheBackendKind::Sqlite));
        assert!("memcached".parse::<CacheBackendKind>().is_err());
    }
}
