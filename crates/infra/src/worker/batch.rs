//! Shared batch flow: decode, one transaction, commit or roll back and requeue.

use std::sync::Arc;

use tracing::{error, warn};

use chatlog_core::{Channel, DecodeError, Payload};

use crate::queue::DurableQueue;
use crate::store::{RecordStore, StoreError, StoreTx};

use super::{RowFailurePolicy, WorkerError};

/// Payloads of one batch that decoded, kept alongside their raw bytes so a
/// failed batch can be put back verbatim.
#[derive(Debug)]
pub struct Decoded<T> {
    pub raw: Vec<Vec<u8>>,
    pub records: Vec<T>,
    pub rejected: usize,
}

/// Backends every applier needs.
pub struct BatchContext<St> {
    pub channel: Channel,
    pub store: St,
    /// Source queue; failed batches go back here.
    pub queue: Arc<dyn DurableQueue>,
    /// Receives payloads that fail to decode.
    pub dead_letter: Arc<dyn DurableQueue>,
    pub policy: RowFailurePolicy,
}

impl<St: RecordStore> BatchContext<St> {
    pub fn new(
        channel: Channel,
        store: St,
        queue: Arc<dyn DurableQueue>,
        dead_letter: Arc<dyn DurableQueue>,
    ) -> Self {
        Self {
            channel,
            store,
            queue,
            dead_letter,
            policy: RowFailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RowFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Decode every payload as this channel's record, moving the ones that do
    /// not decode to the dead-letter queue. Order is preserved.
    pub fn decode<T>(&self, batch: Vec<Vec<u8>>) -> Decoded<T>
    where
        T: TryFrom<Payload, Error = Payload>,
    {
        let mut decoded = Decoded {
            raw: Vec::with_capacity(batch.len()),
            records: Vec::with_capacity(batch.len()),
            rejected: 0,
        };

        for payload in batch {
            match Payload::decode_record(self.channel, &payload) {
                Ok(record) => {
                    decoded.raw.push(payload);
                    decoded.records.push(record);
                }
                Err(e) => {
                    decoded.rejected += 1;
                    self.reject(&payload, &e);
                }
            }
        }
        decoded
    }

    fn reject(&self, payload: &[u8], cause: &DecodeError) {
        warn!(
            channel = %self.channel,
            dead_letter = self.dead_letter.name(),
            error = %cause,
            "payload rejected"
        );
        if let Err(e) = self.dead_letter.put(payload) {
            error!(
                channel = %self.channel,
                error = %e,
                payload = %String::from_utf8_lossy(payload),
                "dead-letter put failed, payload dropped"
            );
        }
    }

    /// Handle one row's write failure per policy. Returns `Ok(())` when the
    /// row is dropped and the batch goes on.
    pub fn row_failed(&self, what: &dyn std::fmt::Display, err: StoreError) -> Result<(), StoreError> {
        if self.policy == RowFailurePolicy::Continue && err.is_constraint() {
            warn!(channel = %self.channel, row = %what, error = %err, "row dropped");
            return Ok(());
        }
        Err(err)
    }

    /// Run `work` in one transaction and commit it. On any failure the
    /// transaction is rolled back and `raw` is put back on the source queue in
    /// order.
    pub fn transact<T>(
        &self,
        raw: &[Vec<u8>],
        work: impl FnOnce(&mut dyn StoreTx) -> Result<T, WorkerError>,
    ) -> Result<T, WorkerError> {
        let mut tx = match self.store.begin() {
            Ok(tx) => tx,
            Err(e) => return Err(self.requeue(raw, e.into())),
        };

        let value = match work(tx.as_mut()) {
            Ok(value) => value,
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    warn!(channel = %self.channel, error = %rollback, "rollback failed");
                }
                return Err(self.requeue(raw, e));
            }
        };

        match tx.commit() {
            Ok(()) => Ok(value),
            Err(e) => Err(self.requeue(raw, e.into())),
        }
    }

    /// Put `raw` back on the source queue after `cause`, returning the error
    /// to surface.
    pub fn requeue(&self, raw: &[Vec<u8>], cause: WorkerError) -> WorkerError {
        if raw.is_empty() {
            return cause;
        }
        match self.queue.put_all(raw) {
            Ok(()) => {
                error!(
                    channel = %self.channel,
                    requeued = raw.len(),
                    error = %cause,
                    "batch rolled back and requeued"
                );
                cause
            }
            Err(requeue) => {
                error!(
                    channel = %self.channel,
                    requeued = requeue.requeued,
                    total = requeue.total,
                    error = %cause,
                    "batch rolled back, requeue incomplete"
                );
                WorkerError::Requeue {
                    cause: Box::new(cause),
                    requeue,
                }
            }
        }
    }
}
