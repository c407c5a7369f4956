//! Room struct definition
//!
//! Represents a chat room as an ordered set of member connections.

use crate::types::{ConnectionId, RoomId};

/// Chat Room
///
/// Members are kept in join order so member lists sent to clients are
/// stable. The room holds ids only; user details live on the connections.
#[derive(Debug)]
pub struct Room {
    /// Room key
    pub id: RoomId,
    members: Vec<ConnectionId>,
}

impl Room {
    /// Create a new empty room
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            members: Vec::new(),
        }
    }

    /// Add a member
    ///
    /// Returns false if the connection was already a member.
    pub fn add_member(&mut self, connection_id: ConnectionId) -> bool {
        if self.contains(connection_id) {
            false
        } else {
            self.members.push(connection_id);
            true
        }
    }

    /// Remove a member
    ///
    /// Returns false if the connection wasn't a member.
    pub fn remove_member(&mut self, connection_id: ConnectionId) -> bool {
        let before = self.members.len();
        self.members.retain(|id| *id != connection_id);
        self.members.len() != before
    }

    /// Check if a connection is in this room
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.members.contains(&connection_id)
    }

    /// Members in join order
    pub fn members(&self) -> &[ConnectionId] {
        &self.members
    }

    /// Members other than `connection_id`
    pub fn others(&self, connection_id: ConnectionId) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members
            .iter()
            .copied()
            .filter(move |id| *id != connection_id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Get the number of members in the room
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}
