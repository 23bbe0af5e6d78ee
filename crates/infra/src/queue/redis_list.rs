//! Redis list-backed queue (RPUSH at the tail, LPOP at the head).
//!
//! The list key is `{name}_queue`, so channel `insert` lives at
//! `insert_queue`.

use tracing::instrument;

use super::{DurableQueue, QueueError};
use crate::redis_conn::{RedisConnector, RedisFailure};

const QUEUE_SUFFIX: &str = "_queue";

#[derive(Debug, Clone)]
pub struct RedisQueue {
    name: String,
    key: String,
    redis: RedisConnector,
}

impl RedisQueue {
    pub fn new(redis: RedisConnector, name: impl Into<String>) -> Self {
        let name = name.into();
        let key = format!("{name}{QUEUE_SUFFIX}");
        Self { name, key, redis }
    }
}

impl From<RedisFailure> for QueueError {
    fn from(value: RedisFailure) -> Self {
        match value {
            RedisFailure::Connection(m) => QueueError::Connection(m),
            failure @ RedisFailure::Command { .. } => QueueError::Command(failure.to_string()),
        }
    }
}

impl DurableQueue for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, payload), fields(key = %self.key, bytes = payload.len()), err)]
    fn put(&self, payload: &[u8]) -> Result<(), QueueError> {
        self.redis.run("RPUSH", |conn| {
            redis::cmd("RPUSH")
                .arg(&self.key)
                .arg(payload)
                .query::<i64>(conn)
        })?;
        Ok(())
    }

    fn get(&self) -> Result<Option<Vec<u8>>, QueueError> {
        let popped = self.redis.run("LPOP", |conn| {
            redis::cmd("LPOP")
                .arg(&self.key)
                .query::<Option<Vec<u8>>>(conn)
        })?;
        Ok(popped)
    }

    fn size(&self) -> Result<u64, QueueError> {
        let len = self.redis.run("LLEN", |conn| {
            redis::cmd("LLEN").arg(&self.key).query::<u64>(conn)
        })?;
        Ok(len)
    }
}
