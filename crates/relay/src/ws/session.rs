use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use huddle_common::protocol::ws::ServerEvent;
use huddle_common::room::RoomId;
use huddle_common::types::Identity;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::identity::{AuthError, IdentityResolver};

pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub const MAX_FRAME_BYTES: usize = 262_144;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub identity: Option<Identity>,
    pub current_room: Option<RoomId>,
    pub outbound: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Debug, Default)]
struct SessionTable {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    by_identity: HashMap<String, HashSet<ConnectionId>>,
}

impl SessionTable {
    fn bind(&mut self, connection_id: ConnectionId, identity: Identity) -> bool {
        let Some(record) = self.connections.get_mut(&connection_id) else {
            return false;
        };

        let previous = record.identity.replace(identity.clone());
        if let Some(previous) = previous {
            Self::unindex(&mut self.by_identity, &previous.id, connection_id);
        }
        self.by_identity.entry(identity.id).or_default().insert(connection_id);
        true
    }

    fn unindex(
        by_identity: &mut HashMap<String, HashSet<ConnectionId>>,
        identity_id: &str,
        connection_id: ConnectionId,
    ) {
        if let Some(connections) = by_identity.get_mut(identity_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                by_identity.remove(identity_id);
            }
        }
    }
}

/// Binds live connections to identities and tracks the room each one sits in.
pub struct SessionManager {
    table: RwLock<SessionTable>,
    resolver: Arc<dyn IdentityResolver>,
}

impl SessionManager {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { table: RwLock::new(SessionTable::default()), resolver }
    }

    pub async fn register(&self, outbound: mpsc::UnboundedSender<ServerEvent>) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        let record = ConnectionRecord { identity: None, current_room: None, outbound };
        self.table.write().await.connections.insert(connection_id, record);
        connection_id
    }

    /// Verifies `credential` and binds the resulting identity. A failed attempt
    /// leaves any earlier binding untouched.
    pub async fn authenticate(
        &self,
        connection_id: ConnectionId,
        credential: &str,
    ) -> Result<Identity, AuthError> {
        let identity = self.resolver.verify(credential).await?;

        if self.table.write().await.bind(connection_id, identity.clone()) {
            info!(
                connection_id = %connection_id,
                user_id = %identity.id,
                "connection authenticated"
            );
        }

        Ok(identity)
    }

    pub async fn resolve_identity(&self, connection_id: ConnectionId) -> Option<Identity> {
        self.table
            .read()
            .await
            .connections
            .get(&connection_id)
            .and_then(|record| record.identity.clone())
    }

    /// The bound identity, binding the guest identity first if the connection
    /// never authenticated. `None` only for unknown connections.
    pub async fn identity_or_guest(&self, connection_id: ConnectionId) -> Option<Identity> {
        let mut table = self.table.write().await;
        let existing = table.connections.get(&connection_id)?.identity.clone();
        if existing.is_some() {
            return existing;
        }

        let guest = self.resolver.guest_identity();
        warn!(
            connection_id = %connection_id,
            user_id = %guest.id,
            "unauthenticated connection bound to guest identity"
        );
        table.bind(connection_id, guest.clone());
        Some(guest)
    }

    pub async fn current_room(&self, connection_id: ConnectionId) -> Option<RoomId> {
        self.table
            .read()
            .await
            .connections
            .get(&connection_id)
            .and_then(|record| record.current_room.clone())
    }

    /// Returns the previous room.
    pub async fn set_current_room(
        &self,
        connection_id: ConnectionId,
        room_id: Option<RoomId>,
    ) -> Option<RoomId> {
        let mut table = self.table.write().await;
        let record = table.connections.get_mut(&connection_id)?;
        std::mem::replace(&mut record.current_room, room_id)
    }

    pub async fn outbound(
        &self,
        connection_id: ConnectionId,
    ) -> Option<mpsc::UnboundedSender<ServerEvent>> {
        self.table
            .read()
            .await
            .connections
            .get(&connection_id)
            .map(|record| record.outbound.clone())
    }

    pub async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        self.table
            .read()
            .await
            .connections
            .get(&connection_id)
            .is_some_and(|record| record.outbound.send(event).is_ok())
    }

    pub async fn connections_for_identity(&self, identity_id: &str) -> Vec<ConnectionId> {
        self.table
            .read()
            .await
            .by_identity
            .get(identity_id)
            .map(|connections| connections.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.table.read().await.connections.len()
    }

    /// Drops every registration for the connection, authenticated or not.
    pub async fn teardown(&self, connection_id: ConnectionId) -> Option<ConnectionRecord> {
        let mut table = self.table.write().await;
        let record = table.connections.remove(&connection_id)?;
        if let Some(identity) = record.identity.as_ref() {
            SessionTable::unindex(&mut table.by_identity, &identity.id, connection_id);
        }
        Some(record)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Accepts `token-<id>` credentials; everything else is invalid.
    pub(crate) struct StaticResolver;

    #[async_trait]
    impl IdentityResolver for StaticResolver {
        async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
            if credential.trim().is_empty() {
                return Err(AuthError::MissingCredential);
            }
            match credential.strip_prefix("token-") {
                Some(id) if !id.is_empty() => Ok(Identity::new(id, id.to_uppercase())),
                _ => Err(AuthError::InvalidCredential),
            }
        }

        fn guest_identity(&self) -> Identity {
            Identity::new("guest", "Guest")
        }
    }

    pub(crate) fn manager() -> SessionManager {
        SessionManager::new(Arc::new(StaticResolver))
    }

    #[tokio::test]
    async fn authenticate_binds_identity_and_indexes_connection() {
        let sessions = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection_id = sessions.register(tx).await;

        assert!(sessions.resolve_identity(connection_id).await.is_none());
        let identity =
            sessions.authenticate(connection_id, "token-ada").await.expect("token is valid");

        assert_eq!(identity.id, "ada");
        assert_eq!(sessions.resolve_identity(connection_id).await, Some(identity));
        assert_eq!(sessions.connections_for_identity("ada").await, vec![connection_id]);
    }

    #[tokio::test]
    async fn failed_authentication_keeps_previous_binding() {
        let sessions = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection_id = sessions.register(tx).await;

        sessions.authenticate(connection_id, "token-ada").await.expect("token is valid");
        assert_eq!(
            sessions.authenticate(connection_id, "garbage").await,
            Err(AuthError::InvalidCredential)
        );
        assert_eq!(
            sessions.authenticate(connection_id, "").await,
            Err(AuthError::MissingCredential)
        );

        let identity = sessions.resolve_identity(connection_id).await.expect("still bound");
        assert_eq!(identity.id, "ada");
    }

    #[tokio::test]
    async fn reauthentication_moves_identity_index() {
        let sessions = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection_id = sessions.register(tx).await;

        sessions.authenticate(connection_id, "token-ada").await.expect("token is valid");
        sessions.authenticate(connection_id, "token-bob").await.expect("token is valid");

        assert!(sessions.connections_for_identity("ada").await.is_empty());
        assert_eq!(sessions.connections_for_identity("bob").await, vec![connection_id]);
    }

    #[tokio::test]
    async fn identity_or_guest_binds_guest_once() {
        let sessions = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection_id = sessions.register(tx).await;

        let guest = sessions.identity_or_guest(connection_id).await.expect("known connection");
        assert_eq!(guest.id, "guest");
        assert_eq!(sessions.resolve_identity(connection_id).await, Some(guest));
        assert!(sessions.identity_or_guest(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn multiple_connections_share_an_identity() {
        let sessions = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = sessions.register(tx.clone()).await;
        let second = sessions.register(tx).await;

        sessions.authenticate(first, "token-ada").await.expect("token is valid");
        sessions.authenticate(second, "token-ada").await.expect("token is valid");

        let mut connections = sessions.connections_for_identity("ada").await;
        connections.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(connections, expected);
    }

    #[tokio::test]
    async fn teardown_removes_all_registrations() {
        let sessions = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        let authenticated = sessions.register(tx.clone()).await;
        let anonymous = sessions.register(tx).await;
        sessions.authenticate(authenticated, "token-ada").await.expect("token is valid");
        sessions
            .set_current_room(authenticated, Some(RoomId::parse("demo").expect("valid room")))
            .await;

        let record = sessions.teardown(authenticated).await.expect("record existed");
        assert_eq!(record.current_room.as_ref().map(RoomId::as_str), Some("demo"));
        assert!(sessions.teardown(anonymous).await.is_some());
        assert!(sessions.teardown(anonymous).await.is_none());

        assert_eq!(sessions.connection_count().await, 0);
        assert!(sessions.connections_for_identity("ada").await.is_empty());
        assert!(sessions.current_room(authenticated).await.is_none());
    }

    #[tokio::test]
    async fn send_to_reaches_registered_outbound() {
        let sessions = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection_id = sessions.register(tx).await;

        let event = ServerEvent::AuthError { reason: "Invalid token".to_string() };
        assert!(sessions.send_to(connection_id, event.clone()).await);
        assert_eq!(rx.try_recv().expect("event queued"), event);
        assert!(!sessions.send_to(Uuid::new_v4(), event).await);
    }
}
