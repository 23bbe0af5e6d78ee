//! Infrastructure layer: queues, dedup window, status board, record store,
//! worker loop and appliers, configuration.
//!
//! Every backend sits behind a sync trait with an in-memory implementation for
//! tests/dev. Redis adapters are behind the `redis` feature; the Postgres
//! store is always built.

pub mod config;
pub mod dedup;
pub mod error;
pub mod queue;
#[cfg(feature = "redis")]
pub mod redis_conn;
pub mod status;
pub mod store;
pub mod worker;

pub use config::{ConfigError, IngestConfig};
pub use dedup::{IdempotencyWindow, InMemoryScoredSet, ScoredSet};
pub use error::CacheError;
pub use queue::{DurableQueue, InMemoryQueue, QueueError, RequeueError};
pub use status::{Heartbeat, InMemoryStatusBoard, StatusBoard, WorkerStatus, collect_report};
pub use store::{InMemoryRecordStore, PostgresRecordStore, RecordStore, StoreError, StoreTx};
pub use worker::{
    BatchApplier, BatchContext, BatchOutcome, EntityReconciler, InsertApplier, InviteApplier,
    MarkApplier, RowFailurePolicy, WorkerConfig, WorkerError, WorkerLoop,
};

#[cfg(test)]
mod integration_tests;
