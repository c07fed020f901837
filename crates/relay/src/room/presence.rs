// Connection-level presence for a single room.
//
// Occupancy counts connections; the member list is de-duplicated by identity
// and ordered by first join.

use std::collections::{HashMap, HashSet};

use huddle_common::protocol::ws::ServerEvent;
use huddle_common::room::RoomId;
use huddle_common::types::{Identity, MemberSummary, PresenceSnapshot};
use tokio::sync::mpsc::UnboundedSender;

use crate::ws::session::ConnectionId;

#[derive(Debug, Clone)]
pub struct RoomMember {
    pub identity: Identity,
    outbound: UnboundedSender<ServerEvent>,
    joined_seq: u64,
}

#[derive(Debug, Default)]
pub struct PresenceSet {
    members: HashMap<ConnectionId, RoomMember>,
    next_seq: u64,
}

impl PresenceSet {
    /// Adds a connection. Returns false if it was already present.
    pub fn insert(
        &mut self,
        connection_id: ConnectionId,
        identity: Identity,
        outbound: UnboundedSender<ServerEvent>,
    ) -> bool {
        if self.members.contains_key(&connection_id) {
            return false;
        }

        let joined_seq = self.next_seq;
        self.next_seq += 1;
        self.members.insert(connection_id, RoomMember { identity, outbound, joined_seq });
        true
    }

    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<RoomMember> {
        self.members.remove(&connection_id)
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.members.contains_key(&connection_id)
    }

    pub fn occupancy(&self) -> usize {
        self.members.len()
    }

    pub fn identity_of(&self, connection_id: ConnectionId) -> Option<&Identity> {
        self.members.get(&connection_id).map(|member| &member.identity)
    }

    /// Re-binds the identity of a connection that re-authenticated in place.
    pub fn rebind(&mut self, connection_id: ConnectionId, identity: Identity) -> bool {
        match self.members.get_mut(&connection_id) {
            Some(member) => {
                member.identity = identity;
                true
            }
            None => false,
        }
    }

    /// Number of joined connections bound to `identity_id`.
    pub fn identity_connections(&self, identity_id: &str) -> usize {
        self.members.values().filter(|member| member.identity.id == identity_id).count()
    }

    pub fn members(&self) -> Vec<MemberSummary> {
        let mut ordered: Vec<_> = self.members.values().collect();
        ordered.sort_by_key(|member| member.joined_seq);

        let mut seen = HashSet::new();
        ordered
            .into_iter()
            .filter(|member| seen.insert(member.identity.id.clone()))
            .map(|member| member.identity.summary())
            .collect()
    }

    pub fn snapshot(&self, room_id: &RoomId, room_name: &str) -> PresenceSnapshot {
        PresenceSnapshot {
            room_id: room_id.clone(),
            room_name: room_name.to_string(),
            count: self.occupancy(),
            members: self.members(),
        }
    }

    pub fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        self.members
            .get(&connection_id)
            .is_some_and(|member| member.outbound.send(event).is_ok())
    }

    /// Enqueues `event` for every member. Returns how many sends succeeded.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        self.broadcast_filtered(event, None)
    }

    pub fn broadcast_excluding(&self, excluded: ConnectionId, event: &ServerEvent) -> usize {
        self.broadcast_filtered(event, Some(excluded))
    }

    fn broadcast_filtered(&self, event: &ServerEvent, excluded: Option<ConnectionId>) -> usize {
        self.members
            .iter()
            .filter(|(connection_id, _)| Some(**connection_id) != excluded)
            .filter(|(_, member)| member.outbound.send(event.clone()).is_ok())
            .count()
    }
}
