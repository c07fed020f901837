// Core domain types shared between the relay and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::room::RoomId;

/// A resolved user identity.
///
/// Immutable for the lifetime of a connection; only re-authentication replaces it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Stable, globally unique user id.
    pub id: String,
    pub display_name: String,
    /// Avatar URI, when the identity provider supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { id: id.into(), display_name: display_name.into(), avatar_ref: None }
    }

    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar_ref.into());
        self
    }

    pub fn summary(&self) -> MemberSummary {
        MemberSummary { id: self.id.clone(), display_name: self.display_name.clone() }
    }
}

/// Display-only view of a room member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub id: String,
    pub display_name: String,
}

/// Full presence view sent to a connection when it joins a room.
///
/// `count` is connection-based (two tabs count twice); `members` is
/// de-duplicated by identity for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub room_id: RoomId,
    pub room_name: String,
    pub count: usize,
    pub members: Vec<MemberSummary>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    System,
}

/// A chat message as stored in a room's bounded history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    /// Sender identity as it was at send time.
    pub sender: Identity,
    #[serde(default)]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

/// Authoritative document snapshot for a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub content: String,
    /// Starts at 1; every accepted edit stores `previous + 1`.
    pub version: u64,
    /// Identity id of the last editor, `None` until the first edit.
    pub last_edited_by: Option<String>,
    pub last_edited_at: DateTime<Utc>,
}

impl DocumentState {
    /// The state of a room that has never been edited.
    pub fn initial(at: DateTime<Utc>) -> Self {
        Self { content: String::new(), version: 1, last_edited_by: None, last_edited_at: at }
    }
}
