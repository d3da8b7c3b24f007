//! Embedded SQLite cache backend

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use harvest_config::SqliteCacheConfig;
use harvest_errors::{HarvestError, HarvestResult};

use super::CacheBackend;

const SCHEMA: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS cache_entries (
        key TEXT PRIMARY KEY,
        category TEXT NOT NULL,
        value BLOB NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_cache_entries_expires_at ON cache_entries (expires_at)",
];

/// SQLite-backed store with an explicit expiry column
///
/// Reads filter on `expires_at`, so rows past expiry are misses even before the
/// sweeper deletes them.
#[derive(Clone)]
pub struct SqliteCacheBackend {
    pool: SqlitePool,
}

impl SqliteCacheBackend {
    /// Open (creating if needed) the database file and its schema
    pub async fn connect(config: &SqliteCacheConfig) -> HarvestResult<Self> {
        if let Some(parent) = Path::new(&config.path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    HarvestError::cache_error(format!(
                        "cannot create cache directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        info!("Opening SQLite cache at {}", config.path);
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database on a single connection
    pub async fn in_memory() -> HarvestResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> HarvestResult<Self> {
        let backend = Self { pool };
        backend.migrate().await?;
        Ok(backend)
    }

    async fn migrate(&self) -> HarvestResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Delete rows past their expiry, returning how many were removed
    pub async fn purge_expired(&self) -> HarvestResult<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of stored rows, expired or not
    pub async fn row_count(&self) -> HarvestResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }

    /// Periodically purge expired rows until shutdown is signalled
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let backend = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            info!("SQLite cache sweeper started, interval {:?}", interval);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("SQLite cache sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        match backend.purge_expired().await {
                            Ok(0) => {}
                            Ok(removed) => debug!("Swept {} expired cache rows", removed),
                            Err(e) => warn!("Cache sweep failed: {}", e),
                        }
                    }
                }
            }
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CacheBackend for SqliteCacheBackend {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> HarvestResult<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM cache_entries WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(Utc::now().timestamp_millis())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get::<Vec<u8>, _>("value")?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value))]
    async fn set(
        &self,
        key: &str,
        category: &str,
        value: &[u8],
        ttl: Duration,
    ) -> HarvestResult<()> {
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl_ms);

        sqlx::query(
            "INSERT INTO cache_entries (key, category, value, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                category = excluded.category,
                value = excluded.value,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(category)
        .bind(value)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> HarvestResult<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn clear_category(&self, category: &str) -> HarvestResult<usize> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE category = ?")
            .bind(category)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn health_check(&self) -> HarvestResult<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
