//! Integration tests for the ingestion pipeline.
//!
//! Tests: Queue → WorkerLoop → Applier → RecordStore (+ dedup window, status)
//!
//! Verifies:
//! - Redelivered messages are stored once within the dedup TTL, again after it
//! - Entity observations produce the expected snapshot and history
//! - Mark requests retry a bounded number of times and never clear bits
//! - A failed commit puts the exact batch back, in order

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chatlog_core::{
        ChatId, ChatMessage, Clock, CompositeKey, ManualClock, MarkRequest, MessageFlags,
        MessageId, UserId,
    };

    use crate::dedup::{IdempotencyWindow, InMemoryScoredSet};
    use crate::queue::{DurableQueue, InMemoryQueue};
    use crate::status::{InMemoryStatusBoard, collect_report};
    use crate::store::InMemoryRecordStore;
    use crate::worker::{
        BatchContext, EntityReconciler, InsertApplier, MarkApplier, WorkerConfig, WorkerLoop,
    };

    const START: i64 = 1_700_000_000;
    const TTL: i64 = 10;

    type Store = Arc<InMemoryRecordStore>;
    type InsertWorker =
        WorkerLoop<InsertApplier<Store, Arc<InMemoryScoredSet>, Arc<ManualClock>>>;

    /// Shared backends for one test.
    struct Pipeline {
        clock: Arc<ManualClock>,
        store: Store,
        board: Arc<InMemoryStatusBoard>,
        insert_q: Arc<InMemoryQueue>,
        entity_q: Arc<InMemoryQueue>,
        mark_q: Arc<InMemoryQueue>,
        ocr_q: Arc<InMemoryQueue>,
    }

    impl Pipeline {
        fn new() -> Self {
            Self {
                clock: ManualClock::arc(START),
                store: InMemoryRecordStore::arc(),
                board: InMemoryStatusBoard::arc(),
                insert_q: InMemoryQueue::arc("insert"),
                entity_q: InMemoryQueue::arc("entity"),
                mark_q: InMemoryQueue::arc("mark"),
                ocr_q: InMemoryQueue::arc("ocr"),
            }
        }

        fn config(&self, name: &str) -> WorkerConfig {
            WorkerConfig::default().with_name(name).with_batch_size(10)
        }

        fn insert_worker(&self) -> InsertWorker {
            let ctx = BatchContext::new(
                chatlog_core::Channel::Insert,
                self.store.clone(),
                self.insert_q.clone(),
                InMemoryQueue::arc("insert_dead"),
            );
            let window = IdempotencyWindow::new(InMemoryScoredSet::arc(), self.clock.clone(), TTL);
            let applier = InsertApplier::new(ctx, window, self.ocr_q.clone());
            WorkerLoop::new(
                self.config("insert"),
                self.insert_q.clone(),
                applier,
                self.board.clone(),
                self.clock.clone(),
            )
        }

        fn entity_worker(&self) -> WorkerLoop<EntityReconciler<Store, Arc<ManualClock>>> {
            let ctx = BatchContext::new(
                chatlog_core::Channel::Entity,
                self.store.clone(),
                self.entity_q.clone(),
                InMemoryQueue::arc("entity_dead"),
            );
            WorkerLoop::new(
                self.config("entity"),
                self.entity_q.clone(),
                EntityReconciler::new(ctx, self.clock.clone()),
                self.board.clone(),
                self.clock.clone(),
            )
        }

        fn mark_worker(&self) -> WorkerLoop<MarkApplier<Store>> {
            let ctx = BatchContext::new(
                chatlog_core::Channel::Mark,
                self.store.clone(),
                self.mark_q.clone(),
                InMemoryQueue::arc("mark_dead"),
            );
            WorkerLoop::new(
                self.config("mark"),
                self.mark_q.clone(),
                MarkApplier::new(ctx),
                self.board.clone(),
                self.clock.clone(),
            )
        }
    }

    fn message_payload(message_id: i64, flag: MessageFlags) -> Vec<u8> {
        serde_json::to_vec(&ChatMessage {
            chat_id: ChatId::new(-1001246822000),
            message_id: MessageId::new(message_id),
            user_id: Some(UserId::new(42)),
            text: format!("message {message_id}"),
            date: START,
            flag,
        })
        .unwrap()
    }

    fn key(message_id: i64) -> CompositeKey {
        CompositeKey::new(ChatId::new(-1001246822000), MessageId::new(message_id))
    }

    fn mark_payload(message_id: i64) -> Vec<u8> {
        serde_json::to_vec(&MarkRequest::new(
            ChatId::new(-1001246822000),
            MessageId::new(message_id),
        ))
        .unwrap()
    }

    fn user_payload(first: &str) -> Vec<u8> {
        format!(r#"{{"type":"user","user":{{"user_id":42,"first_name":"{first}"}}}}"#).into_bytes()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Insert + dedup window
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn redelivery_within_ttl_is_stored_once() {
        let p = Pipeline::new();
        let worker = p.insert_worker();

        p.insert_q.put(&message_payload(1, MessageFlags::NEW)).unwrap();
        worker.poll_once().unwrap();
        p.clock.advance(5);
        p.insert_q.put(&message_payload(1, MessageFlags::NEW)).unwrap();
        let outcome = worker.poll_once().unwrap();

        assert_eq!(outcome.skipped, 1);
        assert_eq!(p.store.messages_for(key(1)).len(), 1);
    }

    #[test]
    fn redelivery_at_exactly_ttl_is_still_a_duplicate() {
        let p = Pipeline::new();
        let worker = p.insert_worker();

        p.insert_q.put(&message_payload(1, MessageFlags::NEW)).unwrap();
        worker.poll_once().unwrap();
        p.clock.advance(TTL);
        p.insert_q.put(&message_payload(1, MessageFlags::NEW)).unwrap();
        worker.poll_once().unwrap();

        assert_eq!(p.store.messages_for(key(1)).len(), 1);
    }

    #[test]
    fn redelivery_after_ttl_is_treated_as_fresh() {
        let p = Pipeline::new();
        let worker = p.insert_worker();

        p.insert_q.put(&message_payload(1, MessageFlags::NEW)).unwrap();
        worker.poll_once().unwrap();
        p.clock.advance(TTL + 1);
        p.insert_q.put(&message_payload(1, MessageFlags::NEW)).unwrap();
        let outcome = worker.poll_once().unwrap();

        assert_eq!(outcome.applied, 1);
        assert_eq!(p.store.messages_for(key(1)).len(), 2);
    }

    #[test]
    fn forced_commit_failure_requeues_exact_batch_in_order() {
        let p = Pipeline::new();
        let worker = p.insert_worker();
        let batch: Vec<Vec<u8>> = (1..=5)
            .map(|id| message_payload(id, MessageFlags::NEW))
            .collect();
        for payload in &batch {
            p.insert_q.put(payload).unwrap();
        }

        p.store.fail_commits(1);
        assert!(worker.poll_once().is_err());
        assert!(p.store.messages().is_empty());
        assert_eq!(p.insert_q.contents(), batch);

        // Nothing was registered in the window, so the retry stores all five.
        let outcome = worker.poll_once().unwrap();
        assert_eq!(outcome.applied, 5);
        assert_eq!(p.store.messages().len(), 5);
        assert!(p.insert_q.contents().is_empty());
    }

    #[test]
    fn bulk_get_under_fill_returns_what_is_there_in_order() {
        let queue = InMemoryQueue::new("insert");
        for i in 0..3u8 {
            queue.put(&[i]).unwrap();
        }
        let batch = queue.bulk_get(10).unwrap();
        assert_eq!(batch, vec![vec![0u8], vec![1u8], vec![2u8]]);
        assert!(queue.bulk_get(10).unwrap().is_empty());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Entity reconciliation
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn user_transition_writes_baseline_and_transition() {
        let p = Pipeline::new();
        let worker = p.entity_worker();

        p.entity_q.put(&user_payload("A")).unwrap();
        worker.poll_once().unwrap();
        p.clock.advance(60);
        p.entity_q.put(&user_payload("B")).unwrap();
        worker.poll_once().unwrap();

        let history: Vec<_> = p
            .store
            .user_history(UserId::new(42))
            .into_iter()
            .map(|h| (h.first_name.unwrap_or_default(), h.date))
            .collect();
        assert_eq!(
            history,
            vec![("A".to_string(), 0), ("B".to_string(), START + 60)]
        );
        let snapshot = p.store.user(UserId::new(42)).unwrap();
        assert_eq!(snapshot.first_name.as_deref(), Some("B"));
    }

    #[test]
    fn identical_user_twice_writes_no_history() {
        let p = Pipeline::new();
        let worker = p.entity_worker();

        p.entity_q.put(&user_payload("A")).unwrap();
        p.entity_q.put(&user_payload("A")).unwrap();
        worker.poll_once().unwrap();

        assert!(p.store.user_history(UserId::new(42)).is_empty());
        let snapshot = p.store.user(UserId::new(42)).unwrap();
        assert_eq!(snapshot.first_name.as_deref(), Some("A"));
    }

    #[test]
    fn group_master_adoption_is_independent_of_renames() {
        let p = Pipeline::new();
        let worker = p.entity_worker();
        let gid = ChatId::new(-1001);

        for body in [
            r#"{"type":"group","group":{"chat_id":-1001,"name":"g"}}"#,
            r#"{"type":"group","group":{"chat_id":-1001,"name":"g","master_uid":7}}"#,
            r#"{"type":"group","group":{"chat_id":-1001,"name":"h","master_uid":9}}"#,
        ] {
            p.entity_q.put(body.as_bytes()).unwrap();
        }
        worker.poll_once().unwrap();

        let snapshot = p.store.group(gid).unwrap();
        assert_eq!(snapshot.master, Some(UserId::new(7)));
        assert_eq!(snapshot.name, "h");
        let names: Vec<_> = p.store.group_history(gid).into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["g".to_string(), "h".to_string()]);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mark retries
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn mark_retries_twice_then_drops() {
        let p = Pipeline::new();
        let worker = p.mark_worker();
        p.mark_q.put(&mark_payload(7)).unwrap();

        let mut tries = Vec::new();
        for _ in 0..2 {
            worker.poll_once().unwrap();
            let back: MarkRequest = serde_json::from_slice(&p.mark_q.contents()[0]).unwrap();
            tries.push(back.tries);
        }
        assert_eq!(tries, vec![1, 2]);

        let outcome = worker.poll_once().unwrap();
        assert_eq!(outcome.skipped, 1);
        assert!(p.mark_q.contents().is_empty());
    }

    #[test]
    fn mark_overtaking_insert_lands_on_retry() {
        let p = Pipeline::new();
        let inserts = p.insert_worker();
        let marks = p.mark_worker();

        p.mark_q.put(&mark_payload(3)).unwrap();
        marks.poll_once().unwrap();
        assert_eq!(p.mark_q.contents().len(), 1);

        p.insert_q.put(&message_payload(3, MessageFlags::NEW)).unwrap();
        p.insert_q.put(&message_payload(3, MessageFlags::EDITED)).unwrap();
        inserts.poll_once().unwrap();

        let outcome = marks.poll_once().unwrap();
        assert_eq!(outcome.applied, 1);
        let flags: Vec<_> = p
            .store
            .messages_for(key(3))
            .into_iter()
            .map(|m| m.message.flag)
            .collect();
        assert_eq!(
            flags,
            vec![
                MessageFlags::DELETED,
                MessageFlags::EDITED | MessageFlags::DELETED
            ]
        );
    }

    // ─────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn status_report_reflects_last_poll() {
        let p = Pipeline::new();
        let worker = p.insert_worker();
        p.insert_q.put(&message_payload(1, MessageFlags::NEW)).unwrap();
        worker.poll_once().unwrap();
        p.clock.advance(30);

        let queues: [&dyn DurableQueue; 2] = [p.insert_q.as_ref(), p.mark_q.as_ref()];
        let report = collect_report(p.board.as_ref(), &queues, p.clock.now());
        assert_eq!(report[0].to_string(), "insert worker: 30 seconds ago, size 0");
        assert_eq!(report[1].to_string(), "mark worker: never ran, size 0");
    }
}
