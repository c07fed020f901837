// WebSocket event types for the huddle.v1 protocol.
//
// Every frame is a JSON text frame tagged by `type`. Event names are
// kebab-case, payload fields camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::room::RoomId;
use crate::types::{ChatMessage, DocumentState, Identity, PresenceSnapshot};

pub const CURRENT_PROTOCOL_VERSION: &str = "huddle.v1";

/// Client -> Server events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Bind an identity to this connection.
    Authenticate {
        #[serde(default)]
        credential: String,
    },

    /// Enter a room, leaving the current one if different.
    JoinRoom { room_id: RoomId },

    /// Post a chat message to a room.
    ChatMessage {
        #[serde(default)]
        content: String,
        room_id: RoomId,
    },

    /// Propose new document content. `observed_version` is the version the
    /// client last saw; it is informational only.
    EditorUpdate {
        #[serde(default)]
        content: String,
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        observed_version: Option<u64>,
    },

    TypingStart { room_id: RoomId },

    TypingStop { room_id: RoomId },
}

impl ClientEvent {
    /// Wire name of the event, used for logging and metrics labels.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::JoinRoom { .. } => "join-room",
            Self::ChatMessage { .. } => "chat-message",
            Self::EditorUpdate { .. } => "editor-update",
            Self::TypingStart { .. } => "typing-start",
            Self::TypingStop { .. } => "typing-stop",
        }
    }
}

/// Server -> Client events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Authenticated { identity: Identity },

    AuthError { reason: String },

    /// Another connection entered the caller's room.
    MemberJoined { identity: Identity, new_count: usize },

    /// A connection left the caller's room.
    MemberLeft { identity: Identity, new_count: usize },

    /// Full presence view of a room.
    PresenceSnapshot(PresenceSnapshot),

    /// Retained chat history, oldest first.
    ChatHistory { room_id: RoomId, messages: Vec<ChatMessage> },

    MessagePosted(ChatMessage),

    /// Sent only to the poster, for UI confirmation.
    PostAck { message_id: String, timestamp: DateTime<Utc> },

    /// Authoritative document state, both on join and after every edit.
    DocumentState(DocumentState),

    TypingChanged { identity: Identity, is_typing: bool },

    OperationError {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
}

impl ServerEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "authenticated",
            Self::AuthError { .. } => "auth-error",
            Self::MemberJoined { .. } => "member-joined",
            Self::MemberLeft { .. } => "member-left",
            Self::PresenceSnapshot(_) => "presence-snapshot",
            Self::ChatHistory { .. } => "chat-history",
            Self::MessagePosted(_) => "message-posted",
            Self::PostAck { .. } => "post-ack",
            Self::DocumentState(_) => "document-state",
            Self::TypingChanged { .. } => "typing-changed",
            Self::OperationError { .. } => "operation-error",
        }
    }
}
