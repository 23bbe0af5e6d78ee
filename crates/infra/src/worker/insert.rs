//! Insert worker: append new chat messages, suppressing redeliveries.
//!
//! The whole batch is written in one transaction. Dedup keys are registered
//! and OCR jobs emitted only once the transaction has committed, so a
//! rolled-back batch leaves no trace in the window or on the `ocr` queue.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, warn};

use chatlog_core::{ChatMessage, Channel, Clock, DedupKey, OcrJob, Payload};

use crate::dedup::{IdempotencyWindow, ScoredSet};
use crate::queue::DurableQueue;
use crate::store::RecordStore;

use super::batch::BatchContext;
use super::{BatchApplier, BatchOutcome, WorkerError};

/// Marker prefix that makes a message spawn an OCR job.
pub const DEFAULT_OCR_HINT: &str = "[OCR]";

pub struct InsertApplier<St, S, C> {
    ctx: BatchContext<St>,
    window: IdempotencyWindow<S, C>,
    ocr: Arc<dyn DurableQueue>,
    ocr_hint: String,
}

impl<St, S, C> InsertApplier<St, S, C>
where
    St: RecordStore,
    S: ScoredSet,
    C: Clock,
{
    pub fn new(
        ctx: BatchContext<St>,
        window: IdempotencyWindow<S, C>,
        ocr: Arc<dyn DurableQueue>,
    ) -> Self {
        Self {
            ctx,
            window,
            ocr,
            ocr_hint: DEFAULT_OCR_HINT.to_string(),
        }
    }

    pub fn with_ocr_hint(mut self, hint: impl Into<String>) -> Self {
        self.ocr_hint = hint.into();
        self
    }

    /// Register committed keys. A failure here only widens the duplicate
    /// window, so it is logged and not surfaced.
    fn remember(&self, keys: &[DedupKey]) {
        for key in keys {
            if let Err(e) = self.window.add(key.as_str()) {
                warn!(key = %key, error = %e, "dedup key not registered");
            }
        }
    }

    fn emit_ocr(&self, jobs: &[OcrJob]) -> usize {
        let mut emitted = 0;
        for job in jobs {
            let bytes = match Payload::from(*job).encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(row_id = %job.id, error = %e, "ocr job not encodable");
                    continue;
                }
            };
            match self.ocr.put(&bytes) {
                Ok(()) => emitted += 1,
                Err(e) => error!(row_id = %job.id, error = %e, "ocr job lost"),
            }
        }
        emitted
    }
}

impl<St, S, C> BatchApplier for InsertApplier<St, S, C>
where
    St: RecordStore,
    S: ScoredSet,
    C: Clock,
{
    fn channel(&self) -> Channel {
        Channel::Insert
    }

    fn apply(&self, batch: Vec<Vec<u8>>) -> Result<BatchOutcome, WorkerError> {
        let decoded = self.ctx.decode::<ChatMessage>(batch);
        let mut outcome = BatchOutcome {
            rejected: decoded.rejected,
            ..BatchOutcome::default()
        };
        if decoded.records.is_empty() {
            return Ok(outcome);
        }

        // Duplicate check happens before the transaction; only new messages
        // take part in dedup, edits are always appended.
        let mut seen: HashSet<DedupKey> = HashSet::new();
        let mut fresh = Vec::with_capacity(decoded.records.len());
        for message in &decoded.records {
            if message.flag.is_new() {
                let key = message.dedup_key();
                let duplicate = if seen.contains(&key) {
                    true
                } else {
                    match self.window.contains(key.as_str()) {
                        Ok(hit) => hit,
                        Err(e) => return Err(self.ctx.requeue(&decoded.raw, e.into())),
                    }
                };
                if duplicate {
                    debug!(key = %key, "duplicate skipped");
                    outcome.skipped += 1;
                    continue;
                }
                seen.insert(key);
            }
            fresh.push(message);
        }

        let (keys, jobs, failed) = self.ctx.transact(&decoded.raw, |tx| {
            let mut keys = Vec::new();
            let mut jobs = Vec::new();
            let mut failed = 0;
            for message in &fresh {
                match tx.insert_message(message) {
                    Ok(id) => {
                        if message.flag.is_new() {
                            keys.push(message.dedup_key());
                        }
                        if message.has_trigger(&self.ocr_hint) {
                            jobs.push(OcrJob::new(id));
                        }
                    }
                    Err(e) => {
                        self.ctx.row_failed(&message.key(), e)?;
                        failed += 1;
                    }
                }
            }
            Ok((keys, jobs, failed))
        })?;

        self.remember(&keys);
        outcome.derived = self.emit_ocr(&jobs);
        outcome.failed = failed;
        outcome.applied = fresh.len() - failed;
        Ok(outcome)
    }
}
