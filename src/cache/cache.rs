//! JSON documents in Redis with a sliding expiry
//!
//! Checkout form state is the only tenant. Every read pushes the expiry out
//! again, so the TTL measures inactivity rather than session age.

use super::{error::CacheResult, RedisPool};
use crate::cache::CacheError;
use async_trait::async_trait;
use bb8::PooledConnection;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, warn};

type RedisConnection<'a> = PooledConnection<'a, RedisConnectionManager>;

#[async_trait]
pub trait Cache<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Read a document and, on a hit, reset its expiry to `ttl`.
    async fn get_and_touch(&self, key: &str, ttl: Duration) -> CacheResult<Option<T>>;

    async fn put(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()>;

    /// True when a document was removed.
    async fn remove(&self, key: &str) -> CacheResult<bool>;
}

/// Typed view over the shared Redis pool.
pub struct RedisCache<T> {
    pool: RedisPool,
    _document: PhantomData<fn() -> T>,
}

impl<T> Clone for RedisCache<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _document: PhantomData,
        }
    }
}

impl<T> RedisCache<T> {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            _document: PhantomData,
        }
    }

    async fn connection(&self) -> CacheResult<RedisConnection<'_>> {
        self.pool.get().await.map_err(|e| {
            warn!("Failed to get Redis connection: {}", e);
            CacheError::from(e)
        })
    }
}

fn ttl_secs(ttl: Duration) -> CacheResult<u64> {
    match ttl.as_secs() {
        0 => Err(CacheError::InvalidTtl("must be at least one second")),
        secs if secs > i64::MAX as u64 => Err(CacheError::InvalidTtl("too large")),
        secs => Ok(secs),
    }
}

#[async_trait]
impl<T> Cache<T> for RedisCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get_and_touch(&self, key: &str, ttl: Duration) -> CacheResult<Option<T>> {
        let secs = ttl_secs(ttl)?;
        let mut conn = self.connection().await?;

        let (raw, _touched): (Option<String>, i64) = redis::pipe()
            .atomic()
            .get(key)
            .expire(key, secs as i64)
            .query_async(&mut *conn)
            .await
            .map_err(|e| {
                warn!(key, "Redis GET/EXPIRE failed: {}", e);
                CacheError::from(e)
            })?;

        let Some(raw) = raw else {
            debug!(key, "Session document not found");
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // Written by an older release; start the form over
                warn!(key, "Discarding undecodable session document: {}", e);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        let secs = ttl_secs(ttl)?;
        let raw = serde_json::to_string(value)?;

        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(key, raw, secs).await.map_err(|e| {
            warn!(key, "Redis SET EX failed: {}", e);
            CacheError::from(e)
        })?;
        debug!(key, ttl_secs = secs, "Session document stored");
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn.del(key).await.map_err(|e| {
            warn!(key, "Redis DEL failed: {}", e);
            CacheError::from(e)
        })?;
        Ok(removed > 0)
    }
}

/// Expiry windows
pub mod ttl {
    use std::time::Duration;

    /// Checkout form state: 30 minutes of inactivity
    pub const CHECKOUT_SESSIONS: Duration = Duration::from_secs(1800);
}
