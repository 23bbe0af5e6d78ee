//! Mutable entities (users, groups) and their reconciliation rules.
//!
//! The store keeps one current snapshot per entity plus an append-only history.
//! Deciding what to write is pure: `plan_user` / `plan_group` look at the
//! current snapshot and the incoming observation and return the writes to
//! perform, in order. Executing them is the infra layer's job.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{ChatId, UserId};

/// Timestamp carried by the synthesized baseline history entry.
pub const BASELINE_DATE: i64 = 0;

// ─────────────────────────────────────────────────────────────────────────────
// Snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Observed user attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "user_id")]
    pub uid: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub lang_code: Option<String>,
}

impl UserProfile {
    /// Whether the identifying name fields match.
    ///
    /// `lang_code` follows the client locale rather than the user and is
    /// carried along on saves without ever triggering a transition.
    pub fn same_identity(&self, other: &Self) -> bool {
        self.username == other.username
            && self.first_name == other.first_name
            && self.last_name == other.last_name
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.uid.get() <= 0 {
            return Err(DomainError::validation(format!(
                "user id must be positive, got {}",
                self.uid
            )));
        }
        Ok(())
    }

    fn history_at(&self, date: i64) -> UserHistoryEntry {
        UserHistoryEntry {
            uid: self.uid,
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            lang_code: self.lang_code.clone(),
            date,
        }
    }
}

/// Observed group attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProfile {
    #[serde(rename = "chat_id")]
    pub gid: ChatId,
    pub name: String,
    #[serde(default)]
    pub link: Option<String>,
    /// Account that first reported the group. Set once, never replaced.
    #[serde(default, rename = "master_uid")]
    pub master: Option<UserId>,
}

impl GroupProfile {
    pub fn same_identity(&self, other: &Self) -> bool {
        self.name == other.name && self.link == other.link
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.gid.get() == 0 {
            return Err(DomainError::validation("group id must be non-zero"));
        }
        Ok(())
    }

    fn history_at(&self, date: i64) -> GroupHistoryEntry {
        GroupHistoryEntry {
            gid: self.gid,
            name: self.name.clone(),
            link: self.link.clone(),
            date,
        }
    }
}

/// Either kind of entity observation, as carried on the `entity` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityObservation {
    User(UserProfile),
    Group(GroupProfile),
}

impl EntityObservation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Group(_) => "group",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::User(u) => u.uid.get(),
            Self::Group(g) => g.gid.get(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// History
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserHistoryEntry {
    pub uid: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub lang_code: Option<String>,
    pub date: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupHistoryEntry {
    pub gid: ChatId,
    pub name: String,
    pub link: Option<String>,
    pub date: i64,
}

impl UserHistoryEntry {
    pub fn is_baseline(&self) -> bool {
        self.date == BASELINE_DATE
    }
}

impl GroupHistoryEntry {
    pub fn is_baseline(&self) -> bool {
        self.date == BASELINE_DATE
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Planning
// ─────────────────────────────────────────────────────────────────────────────

/// One store write produced by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityWrite {
    CreateUser(UserProfile),
    AppendUserHistory(UserHistoryEntry),
    SaveUser(UserProfile),
    CreateGroup(GroupProfile),
    AdoptMaster { gid: ChatId, master: UserId },
    AppendGroupHistory(GroupHistoryEntry),
    SaveGroup(GroupProfile),
}

/// Decide the writes for a user observation.
///
/// - unknown user: create the snapshot
/// - same name fields: nothing
/// - changed: baseline (only if no history yet), transition at `now`, save
pub fn plan_user(
    current: Option<&UserProfile>,
    has_history: bool,
    incoming: &UserProfile,
    now: i64,
) -> Vec<EntityWrite> {
    let Some(current) = current else {
        return vec![EntityWrite::CreateUser(incoming.clone())];
    };

    if current.same_identity(incoming) {
        return Vec::new();
    }

    let mut writes = Vec::with_capacity(3);
    if !has_history {
        writes.push(EntityWrite::AppendUserHistory(
            current.history_at(BASELINE_DATE),
        ));
    }
    writes.push(EntityWrite::AppendUserHistory(incoming.history_at(now)));
    writes.push(EntityWrite::SaveUser(UserProfile {
        uid: current.uid,
        ..incoming.clone()
    }));
    writes
}

/// Decide the writes for a group observation.
///
/// Master adoption is evaluated first and independently of the name/link
/// comparison; the saved snapshot keeps whichever master is in effect.
pub fn plan_group(
    current: Option<&GroupProfile>,
    has_history: bool,
    incoming: &GroupProfile,
    now: i64,
) -> Vec<EntityWrite> {
    let Some(current) = current else {
        return vec![EntityWrite::CreateGroup(incoming.clone())];
    };

    let mut writes = Vec::new();
    let mut master = current.master;

    if master.is_none() {
        if let Some(adopted) = incoming.master {
            writes.push(EntityWrite::AdoptMaster {
                gid: current.gid,
                master: adopted,
            });
            master = Some(adopted);
        }
    }

    if current.same_identity(incoming) {
        return writes;
    }

    if !has_history {
        writes.push(EntityWrite::AppendGroupHistory(
            current.history_at(BASELINE_DATE),
        ));
    }
    writes.push(EntityWrite::AppendGroupHistory(incoming.history_at(now)));
    writes.push(EntityWrite::SaveGroup(GroupProfile {
        gid: current.gid,
        name: incoming.name.clone(),
        link: incoming.link.clone(),
        master,
    }));
    writes
}
