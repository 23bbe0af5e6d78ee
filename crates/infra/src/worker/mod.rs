//! Polling workers.
//!
//! A `WorkerLoop` pulls batches off one queue and hands them to a
//! `BatchApplier`. The appliers (`insert`, `entity`, `mark`, `invite`) own the
//! channel-specific semantics; the shared begin/apply/commit-or-requeue flow
//! lives in `batch`.

pub mod batch;
pub mod entity;
pub mod insert;
pub mod invite;
pub mod mark;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use chatlog_core::{Channel, Clock};

use crate::error::CacheError;
use crate::queue::{DurableQueue, QueueError, RequeueError};
use crate::status::{Heartbeat, StatusBoard};
use crate::store::StoreError;

pub use batch::BatchContext;
pub use entity::EntityReconciler;
pub use insert::InsertApplier;
pub use invite::InviteApplier;
pub use mark::MarkApplier;

/// What happens to the rest of a batch when one row fails to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowFailurePolicy {
    /// Roll back and requeue the whole batch.
    #[default]
    Abort,
    /// Log the row and commit the rest.
    Continue,
}

impl fmt::Display for RowFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowFailurePolicy::Abort => f.write_str("abort"),
            RowFailurePolicy::Continue => f.write_str("continue"),
        }
    }
}

impl FromStr for RowFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(RowFailurePolicy::Abort),
            "continue" => Ok(RowFailurePolicy::Continue),
            other => Err(format!("unknown row failure policy: {other}")),
        }
    }
}

/// Worker loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging and the heartbeat key
    pub name: String,
    /// Maximum payloads pulled per cycle
    pub batch_size: usize,
    /// Sleep between polls of an empty (or unreachable) queue
    pub idle: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            batch_size: 10,
            idle: Duration::from_millis(10),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }
}

/// Error surfaced by one poll cycle. Never fatal to the loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The batch failed and could not be fully put back.
    #[error("batch failed ({cause}) and requeue failed: {requeue}")]
    Requeue {
        cause: Box<WorkerError>,
        #[source]
        requeue: RequeueError,
    },
}

/// Tally of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    /// Payloads pulled off the queue
    pub popped: usize,
    /// Payloads whose writes were committed
    pub applied: usize,
    /// Duplicates, no-op observations and abandoned marks
    pub skipped: usize,
    /// Undecodable payloads moved to the dead-letter queue
    pub rejected: usize,
    /// Rows dropped under `RowFailurePolicy::Continue`
    pub failed: usize,
    /// Payloads deliberately put back for a later attempt
    pub requeued: usize,
    /// Derived jobs emitted to other channels
    pub derived: usize,
}

/// Channel-specific handling of one pulled batch.
pub trait BatchApplier {
    fn channel(&self) -> Channel;

    /// Apply `batch` (in queue order). On error every payload not yet durably
    /// applied has already been put back on the queue.
    fn apply(&self, batch: Vec<Vec<u8>>) -> Result<BatchOutcome, WorkerError>;
}

/// Single-threaded polling loop over one queue.
pub struct WorkerLoop<A> {
    config: WorkerConfig,
    queue: Arc<dyn DurableQueue>,
    applier: A,
    board: Arc<dyn StatusBoard>,
    clock: Arc<dyn Clock>,
}

impl<A: BatchApplier> WorkerLoop<A> {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn DurableQueue>,
        applier: A,
        board: Arc<dyn StatusBoard>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            queue,
            applier,
            board,
            clock,
        }
    }

    /// One iteration: pull, apply, heartbeat. An empty pull does nothing.
    pub fn poll_once(&self) -> Result<BatchOutcome, WorkerError> {
        let batch = self.queue.bulk_get(self.config.batch_size)?;
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let popped = batch.len();
        debug!(worker = %self.config.name, popped, "pulled batch");

        let result = self.applier.apply(batch);
        self.heartbeat();

        let mut outcome = result?;
        outcome.popped = popped;
        Ok(outcome)
    }

    /// Publish `{last: now, size}`. Failures are logged and otherwise ignored.
    fn heartbeat(&self) {
        let size = match self.queue.size() {
            Ok(size) => size,
            Err(e) => {
                warn!(worker = %self.config.name, error = %e, "queue size unavailable");
                0
            }
        };
        let beat = Heartbeat {
            last: self.clock.now(),
            size,
        };
        if let Err(e) = self.board.publish(&self.config.name, beat) {
            warn!(worker = %self.config.name, error = %e, "heartbeat not published");
        }
    }

    /// Poll until `stop` is set. Errors are reported and followed by an idle
    /// sleep; an empty queue also sleeps.
    pub fn run_until(&self, stop: &AtomicBool) {
        info!(
            worker = %self.config.name,
            channel = %self.applier.channel(),
            batch_size = self.config.batch_size,
            "worker started"
        );

        while !stop.load(Ordering::SeqCst) {
            match self.poll_once() {
                Ok(outcome) if outcome.popped == 0 => thread::sleep(self.config.idle),
                Ok(outcome) => {
                    debug!(
                        worker = %self.config.name,
                        applied = outcome.applied,
                        skipped = outcome.skipped,
                        rejected = outcome.rejected,
                        failed = outcome.failed,
                        requeued = outcome.requeued,
                        derived = outcome.derived,
                        "batch done"
                    );
                }
                Err(e) => {
                    error!(worker = %self.config.name, error = %e, "poll cycle failed");
                    chatlog_observability::report(&e, "worker", "poll_once");
                    thread::sleep(self.config.idle);
                }
            }
        }

        info!(worker = %self.config.name, "worker stopped");
    }

    /// Poll forever.
    pub fn run_forever(&self) {
        let never = AtomicBool::new(false);
        self.run_until(&never);
    }
}
