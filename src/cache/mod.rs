//! Redis connection pool and the typed session cache built on it.

pub mod cache;
pub mod error;
pub mod keys;

pub use cache::{Cache, RedisCache};
pub use error::CacheError;

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tracing::{info, warn};

pub type RedisPool = Pool<RedisConnectionManager>;

/// Pool sizing for the session cache. Checkout traffic holds a connection
/// for one or two round trips, so a small pool goes a long way.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub pool_size: u32,
    pub min_idle: Option<u32>,
    /// How long a request waits for a free connection
    pub acquire_timeout: Duration,
    /// Connections are recycled after this age
    pub max_lifetime: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 10,
            min_idle: Some(1),
            acquire_timeout: Duration::from_secs(2),
            max_lifetime: Some(Duration::from_secs(600)),
        }
    }
}

/// Build the pool. An unreachable server at startup is logged, not fatal:
/// session calls fail with `SessionError::Unavailable` until it comes back.
pub async fn init_cache_pool(config: CacheConfig) -> Result<RedisPool, CacheError> {
    let manager = RedisConnectionManager::new(config.redis_url.as_str())?;

    let pool = Pool::builder()
        .max_size(config.pool_size)
        .min_idle(config.min_idle)
        .connection_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .build(manager)
        .await?;

    match ping(&pool).await {
        Ok(()) => info!(pool_size = config.pool_size, "Redis session cache ready"),
        Err(e) => warn!("Redis not reachable yet, sessions will retry: {}", e),
    }
    Ok(pool)
}

async fn ping(pool: &RedisPool) -> Result<(), CacheError> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}
