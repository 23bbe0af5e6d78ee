//! Redis sorted-set backend for the idempotency window
//! (ZSCORE / ZADD / ZREM / DEL on a single key).

use super::ScoredSet;
use crate::error::CacheError;
use crate::redis_conn::RedisConnector;

#[derive(Debug, Clone)]
pub struct RedisScoredSet {
    key: String,
    redis: RedisConnector,
}

impl RedisScoredSet {
    pub fn new(redis: RedisConnector, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            redis,
        }
    }
}

impl ScoredSet for RedisScoredSet {
    fn score(&self, member: &str) -> Result<Option<i64>, CacheError> {
        let score = self.redis.run("ZSCORE", |conn| {
            redis::cmd("ZSCORE")
                .arg(&self.key)
                .arg(member)
                .query::<Option<f64>>(conn)
        })?;
        Ok(score.map(|s| s as i64))
    }

    fn put(&self, member: &str, score: i64) -> Result<(), CacheError> {
        self.redis.run("ZADD", |conn| {
            redis::cmd("ZADD")
                .arg(&self.key)
                .arg(score)
                .arg(member)
                .query::<i64>(conn)
        })?;
        Ok(())
    }

    fn remove(&self, member: &str) -> Result<(), CacheError> {
        self.redis.run("ZREM", |conn| {
            redis::cmd("ZREM")
                .arg(&self.key)
                .arg(member)
                .query::<i64>(conn)
        })?;
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.redis
            .run("DEL", |conn| redis::cmd("DEL").arg(&self.key).query::<i64>(conn))?;
        Ok(())
    }
}
