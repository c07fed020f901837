// Per-room collaboration state: presence, chat, document and typing.
//
// Each room lives behind its own mutex. Every mutation and the broadcasts it
// triggers happen while that mutex is held, so members observe a room's events
// in processing order. A task never holds two room locks at once.

pub mod chat;
pub mod document;
pub mod presence;
pub mod typing;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_common::protocol::ws::ServerEvent;
use huddle_common::room::RoomId;
use huddle_common::types::{
    ChatMessage, DocumentState, Identity, MemberSummary, MessageKind, PresenceSnapshot,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use self::chat::{normalize_content, ChatHistory, NormalizedContent};
use self::document::DocumentStore;
use self::presence::PresenceSet;
use self::typing::TypingSet;
use crate::error::ErrorCode;
use crate::metrics;
use crate::ws::session::{ConnectionId, SessionManager};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("connection is not registered")]
    UnknownConnection,
}

impl RoomError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownConnection => ErrorCode::ConnectionNotRegistered,
        }
    }
}

/// Resolves a room slug to the name shown to members. Consulted once, when
/// the room is first created.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn display_name(&self, room_id: &RoomId) -> String;
}

/// Derives names from the slug itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlugRoomDirectory;

#[async_trait]
impl RoomDirectory for SlugRoomDirectory {
    async fn display_name(&self, room_id: &RoomId) -> String {
        room_id.default_display_name()
    }
}

#[derive(Debug)]
pub struct RoomState {
    id: RoomId,
    name: String,
    created_at: DateTime<Utc>,
    presence: PresenceSet,
    chat: ChatHistory,
    document: DocumentStore,
    typing: TypingSet,
}

impl RoomState {
    fn new(id: RoomId, name: String) -> Self {
        Self {
            id,
            name,
            created_at: Utc::now(),
            presence: PresenceSet::default(),
            chat: ChatHistory::default(),
            document: DocumentStore::default(),
            typing: TypingSet::default(),
        }
    }

    fn snapshot(&self) -> PresenceSnapshot {
        self.presence.snapshot(&self.id, &self.name)
    }

    /// Full room state for a connection that just (re)joined.
    fn seed(&self, connection_id: ConnectionId, identity: &Identity) -> PresenceSnapshot {
        let snapshot = self.snapshot();
        self.presence.send_to(connection_id, ServerEvent::PresenceSnapshot(snapshot.clone()));
        self.presence.send_to(
            connection_id,
            ServerEvent::ChatHistory { room_id: self.id.clone(), messages: self.chat.snapshot() },
        );
        self.presence.send_to(
            connection_id,
            ServerEvent::DocumentState(self.document.current(Utc::now())),
        );
        for typer in self.typing.identities() {
            if typer.id == identity.id {
                continue;
            }
            self.presence.send_to(
                connection_id,
                ServerEvent::TypingChanged { identity: typer, is_typing: true },
            );
        }
        snapshot
    }

    /// Clears `identity` from the typing set once none of its connections
    /// remain in the room.
    fn release_typing(&mut self, identity: &Identity) {
        if self.presence.identity_connections(&identity.id) > 0 {
            return;
        }
        if self.typing.stop(&identity.id) {
            self.presence.broadcast(&ServerEvent::TypingChanged {
                identity: identity.clone(),
                is_typing: false,
            });
        }
    }
}

/// Read-only view of a room for the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub occupancy: usize,
    pub members: Vec<MemberSummary>,
    pub document_version: u64,
    pub message_count: usize,
    pub typing: Vec<MemberSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Posted(ChatMessage),
    /// Content was blank or over the length limit after trimming.
    Dropped,
}

/// Process-wide map of rooms. Rooms are created on first use and kept for
/// the life of the process.
pub struct CollaborationRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<Mutex<RoomState>>>>,
    sessions: Arc<SessionManager>,
    directory: Arc<dyn RoomDirectory>,
}

impl CollaborationRegistry {
    pub fn new(sessions: Arc<SessionManager>, directory: Arc<dyn RoomDirectory>) -> Self {
        Self { rooms: RwLock::new(HashMap::new()), sessions, directory }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    async fn existing_room(&self, room_id: &RoomId) -> Option<Arc<Mutex<RoomState>>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    async fn room(&self, room_id: &RoomId) -> Arc<Mutex<RoomState>> {
        if let Some(room) = self.existing_room(room_id).await {
            return room;
        }

        let name = self.directory.display_name(room_id).await;
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                info!(room_id = %room_id, room_name = %name, "room created");
                Arc::new(Mutex::new(RoomState::new(room_id.clone(), name)))
            })
            .clone();
        metrics::set_active_rooms(rooms.len());
        room
    }

    /// Admits the connection to `room_id`, leaving its previous room first.
    /// Re-joining the current room only re-sends the seed events.
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        room_id: &RoomId,
    ) -> Result<PresenceSnapshot, RoomError> {
        let identity = self
            .sessions
            .identity_or_guest(connection_id)
            .await
            .ok_or(RoomError::UnknownConnection)?;
        let outbound =
            self.sessions.outbound(connection_id).await.ok_or(RoomError::UnknownConnection)?;

        match self.sessions.current_room(connection_id).await {
            Some(current) if &current == room_id => {
                let room = self.room(room_id).await;
                let room = room.lock().await;
                if room.presence.contains(connection_id) {
                    debug!(connection_id = %connection_id, room_id = %room_id, "already joined");
                    return Ok(room.seed(connection_id, &identity));
                }
            }
            Some(previous) => self.leave_room(connection_id, &previous).await,
            None => {}
        }

        let room = self.room(room_id).await;
        let snapshot = {
            let mut room = room.lock().await;
            room.presence.insert(connection_id, identity.clone(), outbound);
            let new_count = room.presence.occupancy();
            room.presence.broadcast_excluding(
                connection_id,
                &ServerEvent::MemberJoined { identity: identity.clone(), new_count },
            );
            room.seed(connection_id, &identity)
        };
        self.sessions.set_current_room(connection_id, Some(room_id.clone())).await;

        info!(
            connection_id = %connection_id,
            room_id = %room_id,
            user_id = %identity.id,
            occupancy = snapshot.count,
            "joined room"
        );
        Ok(snapshot)
    }

    /// Removes the connection from its current room, if any.
    pub async fn leave(&self, connection_id: ConnectionId) {
        if let Some(room_id) = self.sessions.set_current_room(connection_id, None).await {
            self.leave_room(connection_id, &room_id).await;
        }
    }

    async fn leave_room(&self, connection_id: ConnectionId, room_id: &RoomId) {
        let Some(room) = self.existing_room(room_id).await else {
            return;
        };
        let mut room = room.lock().await;
        let Some(member) = room.presence.remove(connection_id) else {
            return;
        };

        let new_count = room.presence.occupancy();
        room.release_typing(&member.identity);
        room.presence.broadcast(&ServerEvent::MemberLeft {
            identity: member.identity.clone(),
            new_count,
        });
        let snapshot = room.snapshot();
        room.presence.broadcast(&ServerEvent::PresenceSnapshot(snapshot));

        info!(
            connection_id = %connection_id,
            room_id = %room_id,
            user_id = %member.identity.id,
            occupancy = new_count,
            "left room"
        );
    }

    /// The connection's room, joining `room_id` first when the connection
    /// sits elsewhere or nowhere.
    async fn ensure_joined(
        &self,
        connection_id: ConnectionId,
        room_id: &RoomId,
    ) -> Result<Arc<Mutex<RoomState>>, RoomError> {
        let current = self.sessions.current_room(connection_id).await;
        if current.as_ref() != Some(room_id) {
            info!(
                connection_id = %connection_id,
                room_id = %room_id,
                current_room = ?current,
                "auto-joining room referenced by request"
            );
            self.join(connection_id, room_id).await?;
        }
        Ok(self.room(room_id).await)
    }

    pub async fn post(
        &self,
        connection_id: ConnectionId,
        room_id: &RoomId,
        raw_content: &str,
    ) -> Result<PostOutcome, RoomError> {
        let room = self.ensure_joined(connection_id, room_id).await?;

        let content = match normalize_content(raw_content) {
            NormalizedContent::Accepted(content) => content,
            NormalizedContent::Empty => {
                debug!(connection_id = %connection_id, room_id = %room_id, "dropped blank message");
                return Ok(PostOutcome::Dropped);
            }
            NormalizedContent::TooLong { chars } => {
                debug!(
                    connection_id = %connection_id,
                    room_id = %room_id,
                    chars,
                    "dropped oversized message"
                );
                return Ok(PostOutcome::Dropped);
            }
        };

        let mut room = room.lock().await;
        let sender =
            room.presence.identity_of(connection_id).cloned().ok_or(RoomError::UnknownConnection)?;

        let appended = room.chat.append(sender, content, MessageKind::Text, Utc::now());
        if appended.evicted.is_some() {
            metrics::increment_chat_messages_evicted();
        }

        let message = appended.message;
        room.presence.broadcast(&ServerEvent::MessagePosted(message.clone()));
        room.presence.send_to(
            connection_id,
            ServerEvent::PostAck { message_id: message.id.clone(), timestamp: message.created_at },
        );

        debug!(
            connection_id = %connection_id,
            room_id = %room_id,
            message_id = %message.id,
            "message posted"
        );
        Ok(PostOutcome::Posted(message))
    }

    /// Stores `content` as the room's document. Always accepted; the stored
    /// version advances by one from its previous value.
    pub async fn propose(
        &self,
        connection_id: ConnectionId,
        room_id: &RoomId,
        content: String,
        observed_version: Option<u64>,
    ) -> Result<DocumentState, RoomError> {
        let room = self.ensure_joined(connection_id, room_id).await?;
        let mut room = room.lock().await;
        let editor =
            room.presence.identity_of(connection_id).cloned().ok_or(RoomError::UnknownConnection)?;

        let previous_version = room.document.version();
        let proposal = room.document.propose(&editor.id, content, observed_version, Utc::now());
        if proposal.stale {
            metrics::increment_stale_document_proposals();
            warn!(
                connection_id = %connection_id,
                room_id = %room_id,
                user_id = %editor.id,
                observed_version = ?observed_version,
                replaced_version = previous_version,
                "document edit built on a stale version; last writer wins"
            );
        }

        room.presence.broadcast(&ServerEvent::DocumentState(proposal.state.clone()));
        debug!(
            connection_id = %connection_id,
            room_id = %room_id,
            version = proposal.state.version,
            "document updated"
        );
        Ok(proposal.state)
    }

    /// Returns whether a `typing-changed` broadcast went out.
    pub async fn start_typing(&self, connection_id: ConnectionId, room_id: &RoomId) -> bool {
        self.set_typing(connection_id, room_id, true).await
    }

    pub async fn stop_typing(&self, connection_id: ConnectionId, room_id: &RoomId) -> bool {
        self.set_typing(connection_id, room_id, false).await
    }

    async fn set_typing(
        &self,
        connection_id: ConnectionId,
        room_id: &RoomId,
        typing: bool,
    ) -> bool {
        if self.sessions.current_room(connection_id).await.as_ref() != Some(room_id) {
            debug!(
                connection_id = %connection_id,
                room_id = %room_id,
                "ignoring typing event for a room the connection is not in"
            );
            return false;
        }

        let Some(room) = self.existing_room(room_id).await else {
            return false;
        };
        let mut room = room.lock().await;
        let Some(identity) = room.presence.identity_of(connection_id).cloned() else {
            return false;
        };

        let changed =
            if typing { room.typing.start(&identity) } else { room.typing.stop(&identity.id) };
        if changed {
            room.presence.broadcast_excluding(
                connection_id,
                &ServerEvent::TypingChanged { identity, is_typing: typing },
            );
        }
        changed
    }

    /// Applies a re-authentication to the connection's room membership.
    pub async fn refresh_identity(&self, connection_id: ConnectionId, identity: &Identity) {
        let Some(room_id) = self.sessions.current_room(connection_id).await else {
            return;
        };
        let Some(room) = self.existing_room(&room_id).await else {
            return;
        };

        let mut room = room.lock().await;
        let Some(previous) = room.presence.identity_of(connection_id).cloned() else {
            return;
        };
        if previous == *identity {
            return;
        }

        room.presence.rebind(connection_id, identity.clone());
        if previous.id != identity.id {
            room.release_typing(&previous);
        }
        let snapshot = room.snapshot();
        room.presence.broadcast(&ServerEvent::PresenceSnapshot(snapshot));
    }

    /// Transport disconnect: drops the session and leaves its room.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let Some(record) = self.sessions.teardown(connection_id).await else {
            return;
        };
        if let Some(room_id) = record.current_room {
            self.leave_room(connection_id, &room_id).await;
        }
    }

    pub async fn occupancy(&self, room_id: &RoomId) -> usize {
        match self.existing_room(room_id).await {
            Some(room) => room.lock().await.presence.occupancy(),
            None => 0,
        }
    }

    /// Oldest-first chat history; empty for unknown rooms.
    pub async fn history(&self, room_id: &RoomId) -> Vec<ChatMessage> {
        match self.existing_room(room_id).await {
            Some(room) => room.lock().await.chat.snapshot(),
            None => Vec::new(),
        }
    }

    pub async fn current_document(&self, room_id: &RoomId) -> DocumentState {
        match self.existing_room(room_id).await {
            Some(room) => room.lock().await.document.current(Utc::now()),
            None => DocumentState::initial(Utc::now()),
        }
    }

    pub async fn typing(&self, room_id: &RoomId) -> Vec<Identity> {
        match self.existing_room(room_id).await {
            Some(room) => room.lock().await.typing.identities(),
            None => Vec::new(),
        }
    }

    pub async fn room_summary(&self, room_id: &RoomId) -> Option<RoomSummary> {
        let room = self.existing_room(room_id).await?;
        let room = room.lock().await;
        Some(RoomSummary {
            room_id: room.id.clone(),
            name: room.name.clone(),
            created_at: room.created_at,
            occupancy: room.presence.occupancy(),
            members: room.presence.members(),
            document_version: room.document.version(),
            message_count: room.chat.len(),
            typing: room.typing.identities().iter().map(Identity::summary).collect(),
        })
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
