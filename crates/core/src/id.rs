//! Strongly-typed identifiers used across the domain.
//!
//! All identifiers are upstream-assigned signed integers (chat ids are negative
//! for groups and channels), so they wrap `i64` rather than UUIDs.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a chat container (group, channel or private chat).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(i64);

/// Identifier of a message within its chat.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

/// Identifier of a user account.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

/// Store-assigned row id of a persisted message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(i64);

macro_rules! impl_int_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let v = i64::from_str(s.trim())
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(v))
            }
        }
    };
}

impl_int_newtype!(ChatId, "ChatId");
impl_int_newtype!(MessageId, "MessageId");
impl_int_newtype!(UserId, "UserId");
impl_int_newtype!(RowId, "RowId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_negative_chat_ids() {
        let id: ChatId = "-1001246822000".parse().unwrap();
        assert_eq!(id.get(), -1001246822000);
        assert_eq!(id.to_string(), "-1001246822000");
    }

    #[test]
    fn rejects_garbage() {
        let err = "abc".parse::<UserId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(_)));
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&MessageId::new(128760)).unwrap();
        assert_eq!(json, "128760");
    }
}
