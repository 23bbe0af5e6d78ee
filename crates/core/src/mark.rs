//! Deferred deletion marks.
//!
//! A deletion notice can overtake the insert of the message it refers to. The
//! mark worker therefore looks the message up, and when it is not there yet,
//! puts the request back with a bumped try counter until `MAX_MARK_TRIES` is
//! exceeded.

use serde::{Deserialize, Serialize};

use crate::error::DomainResult;
use crate::id::{ChatId, MessageId};
use crate::message::CompositeKey;

/// Requeues allowed before a mark request is abandoned.
pub const MAX_MARK_TRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkRequest {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    #[serde(default)]
    pub tries: u32,
}

impl MarkRequest {
    pub fn new(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            chat_id,
            message_id,
            tries: 0,
        }
    }

    pub fn key(&self) -> CompositeKey {
        CompositeKey::new(self.chat_id, self.message_id)
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.key().validate()
    }
}

/// Outcome of one lookup for a mark request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkStep {
    /// The message exists; the flag update is all that is left to do.
    Apply,
    /// Not found yet; put this (bumped) request back on the queue.
    Requeue(MarkRequest),
    /// Not found and out of tries; drop it.
    Abandon(MarkRequest),
}

/// Transition function for a lookup that matched `matched` rows.
pub fn next_step(request: MarkRequest, matched: u64) -> MarkStep {
    if matched > 0 {
        return MarkStep::Apply;
    }

    let bumped = MarkRequest {
        tries: request.tries.saturating_add(1),
        ..request
    };

    if bumped.tries > MAX_MARK_TRIES {
        MarkStep::Abandon(bumped)
    } else {
        MarkStep::Requeue(bumped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> MarkRequest {
        MarkRequest::new(ChatId::new(114), MessageId::new(514))
    }

    #[test]
    fn found_applies() {
        assert_eq!(next_step(request(), 1), MarkStep::Apply);
        assert_eq!(next_step(request(), 3), MarkStep::Apply);
    }

    #[test]
    fn missing_requeues_twice_then_abandons() {
        let first = match next_step(request(), 0) {
            MarkStep::Requeue(r) => r,
            other => panic!("expected requeue, got {other:?}"),
        };
        assert_eq!(first.tries, 1);

        let second = match next_step(first, 0) {
            MarkStep::Requeue(r) => r,
            other => panic!("expected requeue, got {other:?}"),
        };
        assert_eq!(second.tries, 2);

        assert!(matches!(next_step(second, 0), MarkStep::Abandon(r) if r.tries == 3));
    }

    #[test]
    fn found_on_last_try_still_applies() {
        let late = MarkRequest {
            tries: MAX_MARK_TRIES,
            ..request()
        };
        assert_eq!(next_step(late, 1), MarkStep::Apply);
    }

    #[test]
    fn tries_default_to_zero_on_the_wire() {
        let req: MarkRequest = serde_json::from_str(r#"{"chat_id": 114, "message_id": 514}"#).unwrap();
        assert_eq!(req.tries, 0);
    }
}
