//! `chatlog-core`: domain records and pure decision logic.
//!
//! This crate contains **no I/O**: typed records for each queue channel, their
//! validation and wire codec, the entity reconciliation planner, and the mark
//! retry state machine.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod invite;
pub mod mark;
pub mod message;
pub mod payload;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{
    EntityObservation, EntityWrite, GroupHistoryEntry, GroupProfile, UserHistoryEntry,
    UserProfile, plan_group, plan_user,
};
pub use error::{DecodeError, DomainError, DomainResult};
pub use id::{ChatId, MessageId, RowId, UserId};
pub use invite::GroupInvite;
pub use mark::{MAX_MARK_TRIES, MarkRequest, MarkStep, next_step};
pub use message::{ChatMessage, CompositeKey, DedupKey, MessageFlags, OcrJob, StoredMessage};
pub use payload::{Channel, Payload};
