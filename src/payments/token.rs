//! In-process cache of provider bearer tokens.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    usable_until: Instant,
}

/// Bearer tokens keyed by provider name.
///
/// Tokens are treated as expired `safety_margin` before the provider's own expiry.
/// The map lock is held across a fetch, so concurrent requests for the same
/// provider wait for a single token acquisition instead of racing.
pub struct TokenCache {
    tokens: Mutex<HashMap<String, CachedToken>>,
    safety_margin: Duration,
}

impl TokenCache {
    pub fn new(safety_margin: Duration) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            safety_margin,
        }
    }

    /// Cached token for `provider`, or the result of `fetch` on a miss.
    ///
    /// `fetch` resolves to the token and its lifetime as reported by the provider.
    pub async fn get_or_fetch<F, Fut, E>(&self, provider: &str, fetch: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, Duration), E>>,
    {
        let mut tokens = self.tokens.lock().await;

        if let Some(token) = tokens.get(provider) {
            if Instant::now() < token.usable_until {
                debug!(provider, "Using cached bearer token");
                return Ok(token.value.clone());
            }
            debug!(provider, "Cached bearer token expired");
        }

        let (value, lifetime) = fetch().await?;

        match lifetime.checked_sub(self.safety_margin) {
            Some(usable) if !usable.is_zero() => {
                tokens.insert(
                    provider.to_string(),
                    CachedToken {
                        value: value.clone(),
                        usable_until: Instant::now() + usable,
                    },
                );
            }
            _ => {
                tokens.remove(provider);
                debug!(provider, "Token lifetime within safety margin, not caching");
            }
        }

        Ok(value)
    }

    /// Drop the cached token, e.g. after the provider answered 401.
    pub async fn invalidate(&self, provider: &str) {
        self.tokens.lock().await.remove(provider);
    }
}
