//! Durable FIFO queues of opaque byte payloads.
//!
//! Delivery is at-least-once in the weakest sense: `get` removes the payload
//! from the backend, and the only way to get it back is for the consumer to
//! `put` it again. There is no acknowledgment and no visibility timeout.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_list;

use std::sync::Arc;

use tracing::warn;

pub use in_memory::InMemoryQueue;
#[cfg(feature = "redis")]
pub use redis_list::RedisQueue;

/// Queue backend error. Always transient from the worker's point of view.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),
    #[error("queue command error: {0}")]
    Command(String),
}

/// FIFO byte-payload queue over a named channel.
pub trait DurableQueue: Send + Sync {
    /// Channel name (without any backend key suffix).
    fn name(&self) -> &str;

    /// Append a payload at the tail.
    fn put(&self, payload: &[u8]) -> Result<(), QueueError>;

    /// Pop the head, or `None` when the queue is empty.
    fn get(&self) -> Result<Option<Vec<u8>>, QueueError>;

    /// Current length.
    fn size(&self) -> Result<u64, QueueError>;

    /// Pop up to `max` payloads in FIFO order, stopping early once the queue
    /// is empty.
    ///
    /// A backend failure after the first pop ends the batch early instead of
    /// failing it: the payloads already popped exist nowhere else.
    fn bulk_get(&self, max: usize) -> Result<Vec<Vec<u8>>, QueueError> {
        let mut batch = Vec::with_capacity(max);
        while batch.len() < max {
            match self.get() {
                Ok(Some(payload)) => batch.push(payload),
                Ok(None) => break,
                Err(e) if batch.is_empty() => return Err(e),
                Err(e) => {
                    warn!(queue = self.name(), error = %e, popped = batch.len(), "bulk get cut short");
                    break;
                }
            }
        }
        Ok(batch)
    }

    /// Re-put a batch at the tail, preserving its order.
    ///
    /// Stops at the first failure and reports how many were put back.
    fn put_all(&self, payloads: &[Vec<u8>]) -> Result<(), RequeueError> {
        for (idx, payload) in payloads.iter().enumerate() {
            if let Err(source) = self.put(payload) {
                return Err(RequeueError {
                    requeued: idx,
                    total: payloads.len(),
                    source,
                });
            }
        }
        Ok(())
    }
}

/// A batch could only be partially put back.
#[derive(Debug, Clone, thiserror::Error)]
#[error("requeued {requeued} of {total} payloads: {source}")]
pub struct RequeueError {
    pub requeued: usize,
    pub total: usize,
    #[source]
    pub source: QueueError,
}

impl<Q> DurableQueue for Arc<Q>
where
    Q: DurableQueue + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn put(&self, payload: &[u8]) -> Result<(), QueueError> {
        (**self).put(payload)
    }

    fn get(&self) -> Result<Option<Vec<u8>>, QueueError> {
        (**self).get()
    }

    fn size(&self) -> Result<u64, QueueError> {
        (**self).size()
    }

    fn bulk_get(&self, max: usize) -> Result<Vec<Vec<u8>>, QueueError> {
        (**self).bulk_get(max)
    }

    fn put_all(&self, payloads: &[Vec<u8>]) -> Result<(), RequeueError> {
        (**self).put_all(payloads)
    }
}
