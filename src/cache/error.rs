use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// No connection could be obtained (refused, dropped, pool exhausted)
    #[error("redis unavailable: {0}")]
    Unavailable(String),

    #[error("redis command failed: {0}")]
    Command(String),

    #[error("cached value could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("invalid ttl: {0}")]
    InvalidTtl(&'static str),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Command(e.to_string())
        }
    }
}

impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(e: bb8::RunError<redis::RedisError>) -> Self {
        match e {
            bb8::RunError::User(inner) => inner.into(),
            bb8::RunError::TimedOut => Self::Unavailable("pool checkout timed out".to_string()),
        }
    }
}
