//! Group invite links discovered in message text.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{ChatId, UserId};

/// A private-group invite as carried on the `invite` channel.
///
/// The row id is assigned by the producer, not by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInvite {
    pub id: i64,
    pub gid: ChatId,
    #[serde(default)]
    pub inviter: Option<UserId>,
    /// Invite hash, the tail of a `t.me/joinchat/...` link.
    pub link: String,
    pub date: i64,
}

impl GroupInvite {
    pub fn validate(&self) -> DomainResult<()> {
        if self.id <= 0 {
            return Err(DomainError::validation(format!(
                "invite id must be positive, got {}",
                self.id
            )));
        }
        if self.gid.get() == 0 {
            return Err(DomainError::validation("invite gid must be non-zero"));
        }
        if self.link.trim().is_empty() {
            return Err(DomainError::validation("invite link must not be empty"));
        }
        Ok(())
    }
}
