//! In-memory record store (tests/dev).
//!
//! A transaction holds the table lock for its whole lifetime and works on a
//! copy of the tables; commit swaps the copy in, rollback or drop discards it.
//! Transactions are therefore serialized, which matches the single-consumer
//! model of every worker.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chatlog_core::{
    ChatId, ChatMessage, CompositeKey, GroupHistoryEntry, GroupInvite, GroupProfile,
    MessageFlags, RowId, StoredMessage, UserHistoryEntry, UserId, UserProfile,
};

use super::{RecordStore, StoreError, StoreTx};

#[derive(Debug, Clone, Default)]
struct Tables {
    next_row: i64,
    messages: Vec<StoredMessage>,
    users: BTreeMap<UserId, UserProfile>,
    user_history: Vec<UserHistoryEntry>,
    groups: BTreeMap<ChatId, GroupProfile>,
    group_history: Vec<GroupHistoryEntry>,
    invites: BTreeMap<i64, GroupInvite>,
}

impl Tables {
    fn push_message(&mut self, message: &ChatMessage) -> RowId {
        self.next_row += 1;
        let id = RowId::new(self.next_row);
        self.messages.push(StoredMessage {
            id,
            message: message.clone(),
        });
        id
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    tables: Mutex<Tables>,
    rejected: Mutex<HashSet<CompositeKey>>,
    rejected_users: Mutex<HashSet<UserId>>,
    failing_commits: AtomicUsize,
    commits_before_failure: AtomicUsize,
    unavailable: AtomicBool,
    commits: AtomicUsize,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make inserts of this key fail with a constraint error.
    pub fn reject_message(&self, key: CompositeKey) {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.insert(key);
        }
    }

    /// Make writes of this user's snapshot fail with a constraint error.
    pub fn reject_user(&self, uid: UserId) {
        if let Ok(mut rejected) = self.rejected_users.lock() {
            rejected.insert(uid);
        }
    }

    /// Make the next `n` commits fail.
    pub fn fail_commits(&self, n: usize) {
        self.fail_commits_after(0, n);
    }

    /// Let `ok` commits through, then fail the `n` after them.
    pub fn fail_commits_after(&self, ok: usize, n: usize) {
        self.commits_before_failure.store(ok, Ordering::SeqCst);
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Make `begin` fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Insert a committed message directly, bypassing transactions.
    pub fn seed_message(&self, message: &ChatMessage) -> Result<RowId, StoreError> {
        Ok(self.lock()?.push_message(message))
    }

    pub fn seed_user(&self, user: UserProfile) -> Result<(), StoreError> {
        self.lock()?.users.insert(user.uid, user);
        Ok(())
    }

    pub fn messages(&self) -> Vec<StoredMessage> {
        self.read(|t| t.messages.clone())
    }

    pub fn messages_for(&self, key: CompositeKey) -> Vec<StoredMessage> {
        self.read(|t| {
            t.messages
                .iter()
                .filter(|m| m.message.key() == key)
                .cloned()
                .collect()
        })
    }

    pub fn user(&self, uid: UserId) -> Option<UserProfile> {
        self.read(|t| t.users.get(&uid).cloned())
    }

    pub fn user_history(&self, uid: UserId) -> Vec<UserHistoryEntry> {
        self.read(|t| {
            t.user_history
                .iter()
                .filter(|h| h.uid == uid)
                .cloned()
                .collect()
        })
    }

    pub fn group(&self, gid: ChatId) -> Option<GroupProfile> {
        self.read(|t| t.groups.get(&gid).cloned())
    }

    pub fn group_history(&self, gid: ChatId) -> Vec<GroupHistoryEntry> {
        self.read(|t| {
            t.group_history
                .iter()
                .filter(|h| h.gid == gid)
                .cloned()
                .collect()
        })
    }

    pub fn invites(&self) -> Vec<GroupInvite> {
        self.read(|t| t.invites.values().cloned().collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn read<T: Default>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        self.lock().map(|t| f(&*t)).unwrap_or_default()
    }

    fn is_rejected(&self, key: CompositeKey) -> bool {
        self.rejected
            .lock()
            .map(|r| r.contains(&key))
            .unwrap_or(false)
    }

    fn check_user(&self, uid: UserId) -> Result<(), StoreError> {
        let rejected = self
            .rejected_users
            .lock()
            .map(|r| r.contains(&uid))
            .unwrap_or(false);
        if rejected {
            return Err(StoreError::Constraint(format!("user {uid} rejected")));
        }
        Ok(())
    }

    fn take_commit_failure(&self) -> bool {
        if self.failing_commits.load(Ordering::SeqCst) == 0 {
            return false;
        }
        let passes = self
            .commits_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if passes {
            return false;
        }
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store unavailable".to_string()));
        }
        let guard = self.lock()?;
        let work = guard.clone();
        Ok(Box::new(InMemoryTx {
            store: self,
            guard,
            work,
        }))
    }
}

struct InMemoryTx<'a> {
    store: &'a InMemoryRecordStore,
    guard: MutexGuard<'a, Tables>,
    work: Tables,
}

impl StoreTx for InMemoryTx<'_> {
    fn insert_message(&mut self, message: &ChatMessage) -> Result<RowId, StoreError> {
        if self.store.is_rejected(message.key()) {
            return Err(StoreError::Constraint(format!(
                "message {} rejected",
                message.key()
            )));
        }
        Ok(self.work.push_message(message))
    }

    fn count_messages(&mut self, key: CompositeKey) -> Result<u64, StoreError> {
        Ok(self
            .work
            .messages
            .iter()
            .filter(|m| m.message.key() == key)
            .count() as u64)
    }

    fn set_message_flags(
        &mut self,
        key: CompositeKey,
        bits: MessageFlags,
    ) -> Result<u64, StoreError> {
        let mut touched = 0;
        for row in self.work.messages.iter_mut().filter(|m| m.message.key() == key) {
            row.message.flag |= bits;
            touched += 1;
        }
        Ok(touched)
    }

    fn find_user(&mut self, uid: UserId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.work.users.get(&uid).cloned())
    }

    fn insert_user(&mut self, user: &UserProfile) -> Result<(), StoreError> {
        self.store.check_user(user.uid)?;
        if self.work.users.contains_key(&user.uid) {
            return Err(StoreError::Constraint(format!("user {} exists", user.uid)));
        }
        self.work.users.insert(user.uid, user.clone());
        Ok(())
    }

    fn update_user(&mut self, user: &UserProfile) -> Result<(), StoreError> {
        self.store.check_user(user.uid)?;
        if let Some(row) = self.work.users.get_mut(&user.uid) {
            *row = user.clone();
        }
        Ok(())
    }

    fn has_user_history(&mut self, uid: UserId) -> Result<bool, StoreError> {
        Ok(self.work.user_history.iter().any(|h| h.uid == uid))
    }

    fn append_user_history(&mut self, entry: &UserHistoryEntry) -> Result<(), StoreError> {
        self.work.user_history.push(entry.clone());
        Ok(())
    }

    fn find_group(&mut self, gid: ChatId) -> Result<Option<GroupProfile>, StoreError> {
        Ok(self.work.groups.get(&gid).cloned())
    }

    fn insert_group(&mut self, group: &GroupProfile) -> Result<(), StoreError> {
        if self.work.groups.contains_key(&group.gid) {
            return Err(StoreError::Constraint(format!("group {} exists", group.gid)));
        }
        self.work.groups.insert(group.gid, group.clone());
        Ok(())
    }

    fn update_group(&mut self, group: &GroupProfile) -> Result<(), StoreError> {
        if let Some(row) = self.work.groups.get_mut(&group.gid) {
            *row = group.clone();
        }
        Ok(())
    }

    fn set_group_master(&mut self, gid: ChatId, master: UserId) -> Result<(), StoreError> {
        if let Some(row) = self.work.groups.get_mut(&gid) {
            row.master = Some(master);
        }
        Ok(())
    }

    fn has_group_history(&mut self, gid: ChatId) -> Result<bool, StoreError> {
        Ok(self.work.group_history.iter().any(|h| h.gid == gid))
    }

    fn append_group_history(&mut self, entry: &GroupHistoryEntry) -> Result<(), StoreError> {
        self.work.group_history.push(entry.clone());
        Ok(())
    }

    fn insert_invite(&mut self, invite: &GroupInvite) -> Result<(), StoreError> {
        if self.work.invites.contains_key(&invite.id) {
            return Err(StoreError::Constraint(format!("invite {} exists", invite.id)));
        }
        self.work.invites.insert(invite.id, invite.clone());
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx {
            store,
            mut guard,
            work,
        } = *self;
        if store.take_commit_failure() {
            return Err(StoreError::Commit("injected commit failure".to_string()));
        }
        *guard = work;
        store.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
