//! Errors shared by the key/value cache adapters (dedup set, status board).

/// Cache backend error. Transient from the worker's point of view.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),
    #[error("cache command error: {0}")]
    Command(String),
}

#[cfg(feature = "redis")]
impl From<crate::redis_conn::RedisFailure> for CacheError {
    fn from(value: crate::redis_conn::RedisFailure) -> Self {
        use crate::redis_conn::RedisFailure;
        match value {
            RedisFailure::Connection(m) => CacheError::Connection(m),
            failure @ RedisFailure::Command { .. } => CacheError::Command(failure.to_string()),
        }
    }
}
