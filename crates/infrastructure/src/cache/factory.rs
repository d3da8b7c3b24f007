//! Backend selection from configuration

use std::sync::Arc;

use tracing::info;

use harvest_config::{CacheBackendKind, CacheConfig};
use harvest_errors::{HarvestError, HarvestResult};

use super::{CacheBackend, RedisCacheBackend, SqliteCacheBackend};

/// Backend built from configuration
///
/// The SQLite variant is kept concrete so the caller can start its sweeper.
#[derive(Clone)]
pub enum ConfiguredBackend {
    Redis(Arc<RedisCacheBackend>),
    Sqlite(Arc<SqliteCacheBackend>),
}

impl ConfiguredBackend {
    pub fn as_backend(&self) -> Arc<dyn CacheBackend> {
        match self {
            ConfiguredBackend::Redis(backend) => Arc::clone(backend) as Arc<dyn CacheBackend>,
            ConfiguredBackend::Sqlite(backend) => Arc::clone(backend) as Arc<dyn CacheBackend>,
        }
    }

    pub fn sqlite(&self) -> Option<Arc<SqliteCacheBackend>> {
        match self {
            ConfiguredBackend::Sqlite(backend) => Some(Arc::clone(backend)),
            ConfiguredBackend::Redis(_) => None,
        }
    }
}

/// Create the configured backend; an unselected backend is a configuration error
pub async fn create_cache_backend(config: &CacheConfig) -> HarvestResult<ConfiguredBackend> {
    let kind = config.backend.ok_or_else(|| {
        HarvestError::config_error("cache.backend must be set to \"redis\" or \"sqlite\"")
    })?;

    let backend = match kind {
        CacheBackendKind::Redis => {
            ConfiguredBackend::Redis(Arc::new(RedisCacheBackend::connect(&config.redis).await?))
        }
        CacheBackendKind::Sqlite => {
            ConfiguredBackend::Sqlite(Arc::new(SqliteCacheBackend::connect(&config.sqlite).await?))
        }
    };
    info!("Result cache backend initialized: {:?}", kind);
    Ok(backend)
}
