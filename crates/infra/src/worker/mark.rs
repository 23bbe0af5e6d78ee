//! Mark worker: record deletions by OR-ing `DELETED` into stored rows.
//!
//! A deletion notice may arrive before the message it refers to has been
//! inserted. Misses are put back with a bumped try counter (after commit, so
//! a rolled-back batch is not enqueued twice) until `MAX_MARK_TRIES`.

use tracing::{debug, error, warn};

use chatlog_core::{Channel, MarkRequest, MarkStep, MessageFlags, Payload, next_step};

use crate::queue::DurableQueue;
use crate::store::RecordStore;

use super::batch::BatchContext;
use super::{BatchApplier, BatchOutcome, WorkerError};

pub struct MarkApplier<St> {
    ctx: BatchContext<St>,
}

impl<St: RecordStore> MarkApplier<St> {
    pub fn new(ctx: BatchContext<St>) -> Self {
        Self { ctx }
    }

    fn requeue_later(&self, requests: &[MarkRequest]) -> usize {
        let mut requeued = 0;
        for request in requests {
            let put = Payload::from(*request)
                .encode()
                .map_err(|e| e.to_string())
                .and_then(|bytes| self.ctx.queue.put(&bytes).map_err(|e| e.to_string()));
            match put {
                Ok(()) => requeued += 1,
                Err(e) => error!(key = %request.key(), tries = request.tries, error = %e, "mark retry lost"),
            }
        }
        requeued
    }
}

impl<St: RecordStore> BatchApplier for MarkApplier<St> {
    fn channel(&self) -> Channel {
        Channel::Mark
    }

    fn apply(&self, batch: Vec<Vec<u8>>) -> Result<BatchOutcome, WorkerError> {
        let decoded = self.ctx.decode::<MarkRequest>(batch);
        let mut outcome = BatchOutcome {
            rejected: decoded.rejected,
            ..BatchOutcome::default()
        };
        if decoded.records.is_empty() {
            return Ok(outcome);
        }

        let (applied, abandoned, retries) = self.ctx.transact(&decoded.raw, |tx| {
            let mut applied = 0;
            let mut abandoned = 0;
            let mut retries = Vec::new();
            for request in &decoded.records {
                let key = request.key();
                let matched = tx.count_messages(key)?;

                // The OR runs even on a miss: it is idempotent and catches a
                // row inserted between the lookup and the update.
                tx.set_message_flags(key, MessageFlags::DELETED)?;

                match next_step(*request, matched) {
                    MarkStep::Apply => {
                        debug!(key = %key, matched, "marked deleted");
                        applied += 1;
                    }
                    MarkStep::Requeue(bumped) => retries.push(bumped),
                    MarkStep::Abandon(bumped) => {
                        warn!(key = %key, tries = bumped.tries, "mark abandoned, message never arrived");
                        abandoned += 1;
                    }
                }
            }
            Ok((applied, abandoned, retries))
        })?;

        outcome.applied = applied;
        outcome.skipped = abandoned;
        outcome.requeued = self.requeue_later(&retries);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chatlog_core::{ChatId, ChatMessage, CompositeKey, MessageId};

    use crate::queue::InMemoryQueue;
    use crate::store::InMemoryRecordStore;

    fn fixture() -> (MarkApplier<Arc<InMemoryRecordStore>>, Arc<InMemoryRecordStore>, Arc<InMemoryQueue>) {
        let store = InMemoryRecordStore::arc();
        let queue = InMemoryQueue::arc("mark");
        let dead = InMemoryQueue::arc("mark_dead");
        let ctx = BatchContext::new(Channel::Mark, store.clone(), queue.clone(), dead);
        (MarkApplier::new(ctx), store, queue)
    }

    fn stored(flag: MessageFlags) -> ChatMessage {
        ChatMessage {
            chat_id: ChatId::new(114),
            message_id: MessageId::new(514),
            user_id: None,
            text: "hi".to_string(),
            date: 1_000,
            flag,
        }
    }

    fn key() -> CompositeKey {
        CompositeKey::new(ChatId::new(114), MessageId::new(514))
    }

    #[test]
    fn existing_row_gains_deleted_bit() {
        let (applier, store, queue) = fixture();
        store.seed_message(&stored(MessageFlags::EDITED)).unwrap();

        let outcome = applier
            .apply(vec![br#"{"chat_id":114,"message_id":514}"#.to_vec()])
            .unwrap();

        assert_eq!(outcome.applied, 1);
        let flag = store.messages_for(key())[0].message.flag;
        assert!(flag.contains(MessageFlags::EDITED));
        assert!(flag.contains(MessageFlags::DELETED));
        assert!(queue.contents().is_empty());
    }

    #[test]
    fn miss_is_requeued_with_bumped_tries() {
        let (applier, _store, queue) = fixture();

        let outcome = applier
            .apply(vec![br#"{"chat_id":114,"message_id":514}"#.to_vec()])
            .unwrap();

        assert_eq!(outcome.requeued, 1);
        let back: MarkRequest = serde_json::from_slice(&queue.contents()[0]).unwrap();
        assert_eq!(back.tries, 1);
    }

    #[test]
    fn exhausted_request_is_abandoned() {
        let (applier, _store, queue) = fixture();

        let outcome = applier
            .apply(vec![br#"{"chat_id":114,"message_id":514,"tries":2}"#.to_vec()])
            .unwrap();

        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.requeued, 0);
        assert!(queue.contents().is_empty());
    }

    #[test]
    fn rolled_back_batch_is_requeued_verbatim_without_retries() {
        let (applier, store, queue) = fixture();
        store.fail_commits(1);
        let batch = vec![
            br#"{"chat_id":114,"message_id":514}"#.to_vec(),
            br#"{"chat_id":114,"message_id":515,"tries":1}"#.to_vec(),
        ];

        assert!(applier.apply(batch.clone()).is_err());
        assert_eq!(queue.contents(), batch);
        assert_eq!(queue.size().unwrap(), 2);
    }
}
