//! Redis caching for expensive read models.
//!
//! Values are stored as JSON with a default TTL. Read failures degrade to a
//! cache miss so Redis outages never fail a request.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Redis cache client with connection pooling.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    default_ttl: Duration,
}

impl RedisCache {
    /// Create a new Redis cache connection.
    pub async fn new(redis_url: &str, default_ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!("Redis cache connected");

        Ok(Self {
            conn,
            default_ttl: Duration::from_secs(default_ttl_seconds),
        })
    }

    /// Get a value from cache.
    #[instrument(skip(self), fields(cache_hit))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();

        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(data)) => match serde_json::from_str(&data) {
                Ok(value) => {
                    debug!(key = key, "Cache hit");
                    tracing::Span::current().record("cache_hit", true);
                    Some(value)
                }
                Err(e) => {
                    warn!(key = key, error = %e, "Failed to deserialize cached value");
                    tracing::Span::current().record("cache_hit", false);
                    None
                }
            },
            Ok(None) => {
                debug!(key = key, "Cache miss");
                tracing::Span::current().record("cache_hit", false);
                None
            }
            Err(e) => {
                error!(key = key, error = %e, "Redis get error");
                tracing::Span::current().record("cache_hit", false);
                None
            }
        }
    }

    /// Set a value in cache with the default TTL.
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let mut conn = self.conn.clone();

        let data = serde_json::to_string(value).context("Failed to serialize value for cache")?;

        conn.set_ex::<_, _, ()>(key, data, self.default_ttl.as_secs())
            .await
            .context("Failed to set cache value")?;

        debug!(key = key, ttl_secs = self.default_ttl.as_secs(), "Cached value");
        Ok(())
    }

    /// Delete a specific key from cache.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();

        let deleted: i32 = conn.del(key).await.context("Failed to delete cache key")?;

        debug!(key = key, deleted = deleted > 0, "Cache delete");
        Ok(deleted > 0)
    }

    /// Check if Redis is healthy.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;
        Ok(())
    }
}

/// Cache key builders for consistent key formats.
pub mod keys {
    /// Whole CPV tree; bump the suffix when the node shape changes
    pub const CPV_TREE: &str = "cpv:tree:v1";
}
