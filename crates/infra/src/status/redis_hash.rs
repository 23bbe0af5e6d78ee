//! Redis hash-backed status board (`HSET {worker}_worker_status last|size`).

use std::collections::HashMap;

use super::{Heartbeat, StatusBoard, status_key};
use crate::error::CacheError;
use crate::redis_conn::RedisConnector;

#[derive(Debug, Clone)]
pub struct RedisStatusBoard {
    redis: RedisConnector,
}

impl RedisStatusBoard {
    pub fn new(redis: RedisConnector) -> Self {
        Self { redis }
    }
}

impl StatusBoard for RedisStatusBoard {
    fn publish(&self, worker: &str, beat: Heartbeat) -> Result<(), CacheError> {
        let key = status_key(worker);
        self.redis.run("HSET", |conn| {
            redis::cmd("HSET")
                .arg(&key)
                .arg("last")
                .arg(beat.last)
                .arg("size")
                .arg(beat.size)
                .query::<i64>(conn)
        })?;
        Ok(())
    }

    fn read(&self, worker: &str) -> Result<Option<Heartbeat>, CacheError> {
        let key = status_key(worker);
        let fields: HashMap<String, String> = self.redis.run("HGETALL", |conn| {
            redis::cmd("HGETALL").arg(&key).query(conn)
        })?;

        let last = fields.get("last").and_then(|v| v.parse::<i64>().ok());
        let size = fields.get("size").and_then(|v| v.parse::<u64>().ok());

        Ok(last.map(|last| Heartbeat {
            last,
            size: size.unwrap_or(0),
        }))
    }
}
