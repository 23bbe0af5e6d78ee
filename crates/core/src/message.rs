//! Chat message change records.
//!
//! A `ChatMessage` is keyed by its `(chat_id, message_id)` composite key. Once
//! persisted it is only ever mutated by OR-ing bits into its flag mask.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{ChatId, MessageId, RowId, UserId};

/// Status bitmask stored alongside each message.
///
/// `NEW` is the empty mask: a message seen for the first time. Edits are
/// ingested as fresh rows carrying `EDITED`; deletions are recorded by the mark
/// worker OR-ing `DELETED` into existing rows.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageFlags(i16);

impl MessageFlags {
    pub const NEW: Self = Self(0);
    pub const EDITED: Self = Self(1);
    pub const DELETED: Self = Self(2);

    pub const fn from_bits(bits: i16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> i16 {
        self.0
    }

    pub const fn is_new(self) -> bool {
        self.0 == Self::NEW.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MessageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MessageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// The `(chat_id, message_id)` pair identifying a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl CompositeKey {
    pub fn new(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.chat_id.get() == 0 {
            return Err(DomainError::validation("chat_id must be non-zero"));
        }
        if self.message_id.get() <= 0 {
            return Err(DomainError::validation(format!(
                "message_id must be positive, got {}",
                self.message_id
            )));
        }
        Ok(())
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey(format!("{}-{}", self.chat_id, self.message_id))
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.message_id)
    }
}

/// Key under which a message is remembered in the idempotency window.
///
/// Derived 1:1 from the composite key as `"{chat_id}-{message_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DedupKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An incoming chat message as carried on the `insert` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub text: String,
    /// Unix seconds.
    pub date: i64,
    pub flag: MessageFlags,
}

impl ChatMessage {
    pub fn key(&self) -> CompositeKey {
        CompositeKey::new(self.chat_id, self.message_id)
    }

    pub fn dedup_key(&self) -> DedupKey {
        self.key().dedup_key()
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.key().validate()?;
        if self.date < 0 {
            return Err(DomainError::validation(format!(
                "date must be non-negative, got {}",
                self.date
            )));
        }
        if self.flag.bits() < 0 {
            return Err(DomainError::validation(format!(
                "flag must be non-negative, got {}",
                self.flag.bits()
            )));
        }
        Ok(())
    }

    /// True when the text starts with the configured derived-job marker.
    pub fn has_trigger(&self, prefix: &str) -> bool {
        !prefix.is_empty() && self.text.starts_with(prefix)
    }
}

/// A message as persisted, with its store-assigned row id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: RowId,
    pub message: ChatMessage,
}

/// Follow-up job emitted for messages carrying the OCR marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrJob {
    pub id: RowId,
    #[serde(default)]
    pub tries: u32,
}

impl OcrJob {
    pub fn new(id: RowId) -> Self {
        Self { id, tries: 0 }
    }
}
