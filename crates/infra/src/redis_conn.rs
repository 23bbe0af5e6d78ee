//! Shared Redis connection handling for the Redis-backed adapters.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Redis client plus one lazily (re)opened connection.
///
/// A command error drops the cached connection so the next call reconnects;
/// callers see the error once and retry on their next poll.
#[derive(Clone)]
pub struct RedisConnector {
    client: Arc<redis::Client>,
    conn: Arc<Mutex<Option<redis::Connection>>>,
}

impl fmt::Debug for RedisConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConnector")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

/// Redis failure, split by whether a connection could be obtained at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RedisFailure {
    #[error("redis connection error: {0}")]
    Connection(String),
    #[error("redis {op} failed: {message}")]
    Command { op: &'static str, message: String },
}

impl RedisConnector {
    /// Open a client for `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// Only validates the URL; the first command opens the connection.
    pub fn open(redis_url: impl AsRef<str>) -> Result<Self, RedisFailure> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisFailure::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            conn: Arc::new(Mutex::new(None)),
        })
    }

    /// Open the connection eagerly; used at startup to fail fast.
    pub fn ping(&self) -> Result<(), RedisFailure> {
        self.run("PING", |conn| redis::cmd("PING").query::<String>(conn))
            .map(|_| ())
    }

    /// Run one command on the shared connection.
    pub fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, RedisFailure>
    where
        F: FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    {
        let mut slot = self
            .conn
            .lock()
            .map_err(|_| RedisFailure::Connection("connection lock poisoned".to_string()))?;

        if slot.is_none() {
            let conn = self
                .client
                .get_connection()
                .map_err(|e| RedisFailure::Connection(e.to_string()))?;
            debug!("redis connection opened");
            *slot = Some(conn);
        }

        let Some(conn) = slot.as_mut() else {
            return Err(RedisFailure::Connection("no connection".to_string()));
        };

        match f(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                *slot = None;
                Err(RedisFailure::Command {
                    op,
                    message: e.to_string(),
                })
            }
        }
    }
}
