//! Checkout session store
//!
//! Keyed by the browser session id. Redis-backed when a cache pool is
//! configured, otherwise in process memory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::checkout::state::CheckoutState;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CheckoutSessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<CheckoutState>, SessionError>;

    async fn save(&self, session_id: &str, state: &CheckoutState) -> Result<(), SessionError>;

    /// Drop the session's state. Returns whether anything was stored.
    async fn clear(&self, session_id: &str) -> Result<bool, SessionError>;
}

#[derive(Default, Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, CheckoutState>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckoutSessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<CheckoutState>, SessionError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: &CheckoutState) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}

#[cfg(feature = "cache")]
pub use redis_store::RedisSessionStore;

#[cfg(feature = "cache")]
mod redis_store {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{CheckoutSessionStore, SessionError};
    use crate::cache::cache::ttl;
    use crate::cache::{keys, Cache, CacheError, RedisCache};
    use crate::checkout::state::CheckoutState;

    impl From<CacheError> for SessionError {
        fn from(e: CacheError) -> Self {
            SessionError::Unavailable(e.to_string())
        }
    }

    pub struct RedisSessionStore {
        cache: RedisCache<CheckoutState>,
        ttl: Duration,
    }

    impl RedisSessionStore {
        pub fn new(cache: RedisCache<CheckoutState>) -> Self {
            Self {
                cache,
                ttl: ttl::CHECKOUT_SESSIONS,
            }
        }

        pub fn with_ttl(mut self, ttl: Duration) -> Self {
            self.ttl = ttl;
            self
        }
    }

    #[async_trait]
    impl CheckoutSessionStore for RedisSessionStore {
        async fn load(&self, session_id: &str) -> Result<Option<CheckoutState>, SessionError> {
            let key = keys::checkout::session(session_id);
            Ok(self.cache.get_and_touch(&key, self.ttl).await?)
        }

        async fn save(&self, session_id: &str, state: &CheckoutState) -> Result<(), SessionError> {
            let key = keys::checkout::session(session_id);
            self.cache.put(&key, state, self.ttl).await?;
            Ok(())
        }

        async fn clear(&self, session_id: &str) -> Result<bool, SessionError> {
            let key = keys::checkout::session(session_id);
            Ok(self.cache.remove(&key).await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_round_trip_and_clear() {
        let store = InMemorySessionStore::new();
        let state = CheckoutState {
            coupon_code: Some("WELCOME".to_string()),
            ..CheckoutState::default()
        };

        store.save("sess-1", &state).await.unwrap();
        assert_eq!(store.load("sess-1").await.unwrap(), Some(state));
        assert!(store.clear("sess-1").await.unwrap());
        assert!(!store.clear("sess-1").await.unwrap());
        assert_eq!(store.load("sess-1").await.unwrap(), None);
    }
}
