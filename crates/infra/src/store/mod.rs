//! Relational store boundary.
//!
//! Workers only ever talk to the store through a `StoreTx`: create, find by
//! key, update by key (including OR-ing message flag bits) and count by key,
//! then commit or roll back. The transaction is the unit of atomicity for a
//! batch.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use thiserror::Error;

use chatlog_core::{
    ChatId, ChatMessage, CompositeKey, GroupHistoryEntry, GroupInvite, GroupProfile,
    MessageFlags, RowId, UserHistoryEntry, UserId, UserProfile,
};

pub use in_memory::InMemoryRecordStore;
pub use postgres::PostgresRecordStore;

/// Store operation error.
///
/// - **Connection**: backend unreachable (transient; the batch is redelivered)
/// - **Constraint**: a single row was rejected (unique key, check, length)
/// - **Commit**: the transaction could not be committed
/// - **Backend**: any other backend failure
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_constraint(&self) -> bool {
        matches!(self, StoreError::Constraint(_))
    }
}

/// A relational store that hands out transactions.
pub trait RecordStore: Send + Sync {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError>;
}

impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        (**self).begin()
    }
}

/// One open transaction.
///
/// Dropping a transaction without committing discards its writes.
pub trait StoreTx {
    // Messages ---------------------------------------------------------------

    /// Insert a message, returning its assigned row id.
    fn insert_message(&mut self, message: &ChatMessage) -> Result<RowId, StoreError>;

    /// Number of rows carrying this composite key.
    fn count_messages(&mut self, key: CompositeKey) -> Result<u64, StoreError>;

    /// OR `bits` into the flags of every row with this key, returning the
    /// number of rows touched. Never clears bits.
    fn set_message_flags(&mut self, key: CompositeKey, bits: MessageFlags)
    -> Result<u64, StoreError>;

    // Users ------------------------------------------------------------------

    fn find_user(&mut self, uid: UserId) -> Result<Option<UserProfile>, StoreError>;
    fn insert_user(&mut self, user: &UserProfile) -> Result<(), StoreError>;
    fn update_user(&mut self, user: &UserProfile) -> Result<(), StoreError>;
    fn has_user_history(&mut self, uid: UserId) -> Result<bool, StoreError>;
    fn append_user_history(&mut self, entry: &UserHistoryEntry) -> Result<(), StoreError>;

    // Groups -----------------------------------------------------------------

    fn find_group(&mut self, gid: ChatId) -> Result<Option<GroupProfile>, StoreError>;
    fn insert_group(&mut self, group: &GroupProfile) -> Result<(), StoreError>;
    fn update_group(&mut self, group: &GroupProfile) -> Result<(), StoreError>;
    fn set_group_master(&mut self, gid: ChatId, master: UserId) -> Result<(), StoreError>;
    fn has_group_history(&mut self, gid: ChatId) -> Result<bool, StoreError>;
    fn append_group_history(&mut self, entry: &GroupHistoryEntry) -> Result<(), StoreError>;

    // Invites ----------------------------------------------------------------

    fn insert_invite(&mut self, invite: &GroupInvite) -> Result<(), StoreError>;

    // Outcome ----------------------------------------------------------------

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
