//! Worker heartbeats.
//!
//! After each poll cycle that did work, a worker writes `{last, size}` under
//! `{worker}_worker_status`. Writes are fire-and-forget and keyed per worker,
//! so workers never contend on them.

#[cfg(feature = "redis")]
pub mod redis_hash;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::error::CacheError;
use crate::queue::DurableQueue;

#[cfg(feature = "redis")]
pub use redis_hash::RedisStatusBoard;

/// Last poll time (unix seconds) and backlog depth of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Heartbeat {
    pub last: i64,
    pub size: u64,
}

pub fn status_key(worker: &str) -> String {
    format!("{worker}_worker_status")
}

pub trait StatusBoard: Send + Sync {
    fn publish(&self, worker: &str, beat: Heartbeat) -> Result<(), CacheError>;
    fn read(&self, worker: &str) -> Result<Option<Heartbeat>, CacheError>;
}

impl<B> StatusBoard for Arc<B>
where
    B: StatusBoard + ?Sized,
{
    fn publish(&self, worker: &str, beat: Heartbeat) -> Result<(), CacheError> {
        (**self).publish(worker, beat)
    }

    fn read(&self, worker: &str) -> Result<Option<Heartbeat>, CacheError> {
        (**self).read(worker)
    }
}

/// In-memory status board for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryStatusBoard {
    inner: RwLock<HashMap<String, Heartbeat>>,
}

impl InMemoryStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl StatusBoard for InMemoryStatusBoard {
    fn publish(&self, worker: &str, beat: Heartbeat) -> Result<(), CacheError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| CacheError::Command("lock poisoned".to_string()))?;
        map.insert(status_key(worker), beat);
        Ok(())
    }

    fn read(&self, worker: &str) -> Result<Option<Heartbeat>, CacheError> {
        let map = self
            .inner
            .read()
            .map_err(|_| CacheError::Command("lock poisoned".to_string()))?;
        Ok(map.get(&status_key(worker)).copied())
    }
}

/// One line of the status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub worker: String,
    /// `None` when the worker has never published a heartbeat.
    pub seconds_ago: Option<i64>,
    /// Live queue length, or the last published one if the queue is unreachable.
    pub size: Option<u64>,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} worker: ", self.worker)?;
        match self.seconds_ago {
            Some(secs) => write!(f, "{secs} seconds ago")?,
            None => f.write_str("never ran")?,
        }
        match self.size {
            Some(size) => write!(f, ", size {size}"),
            None => f.write_str(", size unknown"),
        }
    }
}

/// Build the status report for `queues`, one line per worker.
pub fn collect_report<B>(board: &B, queues: &[&dyn DurableQueue], now: i64) -> Vec<WorkerStatus>
where
    B: StatusBoard + ?Sized,
{
    queues
        .iter()
        .map(|queue| {
            let worker = queue.name().to_string();
            let beat = board.read(&worker).ok().flatten();
            let size = queue.size().ok().or(beat.map(|b| b.size));
            WorkerStatus {
                seconds_ago: beat.map(|b| now.saturating_sub(b.last)),
                size,
                worker,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;

    #[test]
    fn publish_then_read() {
        let board = InMemoryStatusBoard::new();
        assert_eq!(board.read("insert").unwrap(), None);
        board
            .publish("insert", Heartbeat { last: 100, size: 3 })
            .unwrap();
        assert_eq!(
            board.read("insert").unwrap(),
            Some(Heartbeat { last: 100, size: 3 })
        );
        assert_eq!(board.read("mark").unwrap(), None);
    }

    #[test]
    fn report_lines() {
        let board = InMemoryStatusBoard::new();
        board.publish("insert", Heartbeat { last: 90, size: 1 }).unwrap();

        let insert = InMemoryQueue::new("insert");
        insert.put(b"x").unwrap();
        insert.put(b"y").unwrap();
        let mark = InMemoryQueue::new("mark");
        mark.set_unavailable(true);

        let report = collect_report(&board, &[&insert, &mark], 100);
        assert_eq!(report[0].to_string(), "insert worker: 10 seconds ago, size 2");
        assert_eq!(report[1].to_string(), "mark worker: never ran, size unknown");
    }

    #[test]
    fn corrupt_heartbeat_time_does_not_overflow() {
        let board = InMemoryStatusBoard::new();
        board
            .publish("entity", Heartbeat { last: i64::MIN, size: 0 })
            .unwrap();
        let entity = InMemoryQueue::new("entity");

        let report = collect_report(&board, &[&entity], 100);
        assert_eq!(report[0].seconds_ago, Some(i64::MAX));
    }

    #[test]
    fn status_key_format() {
        assert_eq!(status_key("entity"), "entity_worker_status");
    }
}
