//! Wire format of queue payloads.
//!
//! Each channel carries exactly one JSON schema. Decoding goes through the
//! channel's typed record and its validation; a payload that does not fit is
//! a `DecodeError`, never a record with zeroed fields.

use core::fmt;
use core::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entity::{EntityObservation, GroupProfile, UserProfile};
use crate::error::{DecodeError, DomainError, DomainResult};
use crate::invite::GroupInvite;
use crate::mark::MarkRequest;
use crate::message::{ChatMessage, OcrJob};

/// Named queue channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Insert,
    Entity,
    Mark,
    Invite,
    Ocr,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Insert,
        Channel::Entity,
        Channel::Mark,
        Channel::Invite,
        Channel::Ocr,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Channel::Insert => "insert",
            Channel::Entity => "entity",
            Channel::Mark => "mark",
            Channel::Invite => "invite",
            Channel::Ocr => "ocr",
        }
    }

    /// Queue receiving payloads of this channel that failed to decode.
    pub fn dead_letter_name(self) -> String {
        format!("{}_dead", self.name())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown channel: {s}")))
    }
}

/// A decoded payload, tagged by the channel it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Insert(ChatMessage),
    Entity(EntityObservation),
    Mark(MarkRequest),
    Invite(GroupInvite),
    Ocr(OcrJob),
}

impl Payload {
    pub fn decode(channel: Channel, bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(match channel {
            Channel::Insert => Payload::Insert(decode_message(bytes)?),
            Channel::Entity => Payload::Entity(decode_entity(bytes)?),
            Channel::Mark => Payload::Mark(decode_mark(bytes)?),
            Channel::Invite => Payload::Invite(decode_invite(bytes)?),
            Channel::Ocr => Payload::Ocr(decode_json(channel, bytes)?),
        })
    }

    pub fn channel(&self) -> Channel {
        match self {
            Payload::Insert(_) => Channel::Insert,
            Payload::Entity(_) => Channel::Entity,
            Payload::Mark(_) => Channel::Mark,
            Payload::Invite(_) => Channel::Invite,
            Payload::Ocr(_) => Channel::Ocr,
        }
    }

    pub fn encode(&self) -> DomainResult<Vec<u8>> {
        match self {
            Payload::Insert(m) => encode_json(m),
            Payload::Entity(e) => encode_json(&EntityItem::from(e)),
            Payload::Mark(m) => encode_json(m),
            Payload::Invite(i) => encode_json(i),
            Payload::Ocr(o) => encode_json(o),
        }
    }

    /// Decode `bytes` as the record type of `channel`. A payload that
    /// decodes to a different record kind is rejected.
    pub fn decode_record<T>(channel: Channel, bytes: &[u8]) -> Result<T, DecodeError>
    where
        T: TryFrom<Payload, Error = Payload>,
    {
        T::try_from(Payload::decode(channel, bytes)?).map_err(|other| {
            DecodeError::invalid(
                channel,
                DomainError::invariant(format!("{} payload is not a {channel} record", other.channel())),
            )
        })
    }
}

macro_rules! payload_record {
    ($variant:ident, $record:ty) => {
        impl From<$record> for Payload {
            fn from(value: $record) -> Self {
                Payload::$variant(value)
            }
        }

        impl TryFrom<Payload> for $record {
            type Error = Payload;

            fn try_from(value: Payload) -> Result<Self, Payload> {
                match value {
                    Payload::$variant(record) => Ok(record),
                    other => Err(other),
                }
            }
        }
    };
}

payload_record!(Insert, ChatMessage);
payload_record!(Entity, EntityObservation);
payload_record!(Mark, MarkRequest);
payload_record!(Invite, GroupInvite);
payload_record!(Ocr, OcrJob);

pub fn decode_message(bytes: &[u8]) -> Result<ChatMessage, DecodeError> {
    let message: ChatMessage = decode_json(Channel::Insert, bytes)?;
    message
        .validate()
        .map_err(|e| DecodeError::invalid(Channel::Insert, e))?;
    Ok(message)
}

pub fn decode_mark(bytes: &[u8]) -> Result<MarkRequest, DecodeError> {
    let request: MarkRequest = decode_json(Channel::Mark, bytes)?;
    request
        .validate()
        .map_err(|e| DecodeError::invalid(Channel::Mark, e))?;
    Ok(request)
}

pub fn decode_invite(bytes: &[u8]) -> Result<GroupInvite, DecodeError> {
    let invite: GroupInvite = decode_json(Channel::Invite, bytes)?;
    invite
        .validate()
        .map_err(|e| DecodeError::invalid(Channel::Invite, e))?;
    Ok(invite)
}

pub fn decode_entity(bytes: &[u8]) -> Result<EntityObservation, DecodeError> {
    let item: EntityItem = decode_json(Channel::Entity, bytes)?;
    let observation = item
        .into_observation()
        .map_err(|e| DecodeError::invalid(Channel::Entity, e))?;
    let checked = match &observation {
        EntityObservation::User(u) => u.validate(),
        EntityObservation::Group(g) => g.validate(),
    };
    checked.map_err(|e| DecodeError::invalid(Channel::Entity, e))?;
    Ok(observation)
}

pub fn encode_json<T: Serialize>(value: &T) -> DomainResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| DomainError::invariant(format!("encode failed: {e}")))
}

fn decode_json<T: DeserializeOwned>(channel: Channel, bytes: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(bytes).map_err(|e| DecodeError::malformed(channel, e.to_string()))
}

/// `{"type": "user", "user": {...}}` or `{"type": "group", "group": {...}}`.
#[derive(Debug, Serialize, Deserialize)]
struct EntityItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<UserProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<GroupProfile>,
}

impl EntityItem {
    fn into_observation(self) -> DomainResult<EntityObservation> {
        match (self.kind.as_str(), self.user, self.group) {
            ("user", Some(user), None) => Ok(EntityObservation::User(user)),
            ("group", None, Some(group)) => Ok(EntityObservation::Group(group)),
            ("user", None, _) => Err(DomainError::validation("type is user but no user body")),
            ("group", _, None) => Err(DomainError::validation("type is group but no group body")),
            ("user" | "group", _, _) => Err(DomainError::validation(
                "entity payload carries both user and group bodies",
            )),
            (other, _, _) => Err(DomainError::validation(format!(
                "unknown entity type: {other}"
            ))),
        }
    }
}

impl From<&EntityObservation> for EntityItem {
    fn from(value: &EntityObservation) -> Self {
        match value {
            EntityObservation::User(u) => EntityItem {
                kind: "user".to_string(),
                user: Some(u.clone()),
                group: None,
            },
            EntityObservation::Group(g) => EntityItem {
                kind: "group".to_string(),
                user: None,
                group: Some(g.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ChatId, MessageId, UserId};
    use crate::message::MessageFlags;

    #[test]
    fn decodes_insert_payload() {
        let raw = r#"{"chat_id": -1001246822000, "message_id": 128760, "user_id": 565713943,
            "text": "别人恐惧时候", "date": 1525185960, "flag": 0}"#;
        let message = decode_message(raw.as_bytes()).unwrap();
        assert_eq!(message.chat_id, ChatId::new(-1001246822000));
        assert_eq!(message.message_id, MessageId::new(128760));
        assert_eq!(message.user_id, Some(UserId::new(565713943)));
        assert_eq!(message.text, "别人恐惧时候");
        assert_eq!(message.date, 1525185960);
        assert_eq!(message.flag, MessageFlags::NEW);
    }

    #[test]
    fn null_author_is_none() {
        let raw = br#"{"chat_id": -1001246822000, "message_id": 128760, "user_id": null,
            "text": "x", "date": 1525185960, "flag": 0}"#;
        assert_eq!(decode_message(raw).unwrap().user_id, None);
    }

    #[test]
    fn missing_key_fields_are_rejected() {
        let raw = br#"{"message_id": 1, "text": "x", "date": 1, "flag": 0}"#;
        let err = decode_message(raw).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { channel: Channel::Insert, .. }));
    }

    #[test]
    fn zero_composite_key_is_rejected() {
        let raw = br#"{"chat_id": 0, "message_id": 0, "text": "x", "date": 1, "flag": 0}"#;
        let err = decode_message(raw).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid { .. }));
    }

    #[test]
    fn non_json_is_rejected() {
        assert!(Payload::decode(Channel::Mark, b"{'chat_id': 114}").is_err());
    }

    #[test]
    fn decodes_user_and_group_entities() {
        let user = br#"{"type": "user", "user": {"user_id": 1, "first_name": "A", "last_name": null, "username": "a", "lang_code": "en"}}"#;
        assert!(matches!(decode_entity(user).unwrap(), EntityObservation::User(u) if u.uid == UserId::new(1)));

        let group = br#"{"type": "group", "group": {"chat_id": -100, "name": "g", "link": null, "master_uid": 9}}"#;
        match decode_entity(group).unwrap() {
            EntityObservation::Group(g) => assert_eq!(g.master, Some(UserId::new(9))),
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn entity_tag_must_match_body() {
        let raw = br#"{"type": "group", "user": {"user_id": 1}}"#;
        assert!(decode_entity(raw).is_err());
        let raw = br#"{"type": "channel", "group": {"chat_id": -1, "name": "g"}}"#;
        assert!(decode_entity(raw).is_err());
    }

    #[test]
    fn entity_encoding_decodes_back() {
        let obs = EntityObservation::Group(GroupProfile {
            gid: ChatId::new(-5),
            name: "g".to_string(),
            link: Some("link".to_string()),
            master: None,
        });
        let bytes = Payload::Entity(obs.clone()).encode().unwrap();
        assert_eq!(decode_entity(&bytes).unwrap(), obs);
    }

    #[test]
    fn decode_record_yields_the_channel_record() {
        let raw = br#"{"chat_id": -100, "message_id": 7, "tries": 1}"#;
        let request: MarkRequest = Payload::decode_record(Channel::Mark, raw).unwrap();
        assert_eq!(request.tries, 1);
        assert_eq!(Payload::from(request).channel(), Channel::Mark);
    }

    #[test]
    fn decode_record_rejects_other_record_kind() {
        let raw = br#"{"chat_id": -100, "message_id": 7, "text": "x", "date": 1, "flag": 0}"#;
        let err = Payload::decode_record::<MarkRequest>(Channel::Insert, raw).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid { channel: Channel::Insert, .. }));
    }

    #[test]
    fn channel_names_parse() {
        for channel in Channel::ALL {
            assert_eq!(channel.name().parse::<Channel>().unwrap(), channel);
        }
        assert_eq!(Channel::Insert.dead_letter_name(), "insert_dead");
        assert!("find_link".parse::<Channel>().is_err());
    }
}
