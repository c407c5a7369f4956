//! Connection struct definition
//!
//! Represents a registered transport with its protocol state and the
//! outbound queue feeding its write pump.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{AppError, SendError};
use crate::message::{ServerMessage, User};
use crate::types::{ConnectionId, RoomId};

/// Protocol state of a connection
///
/// `Unbound → Joined → Closed`, or `Unbound → Closed`. A user exists
/// only inside `Joined`, so a user without a room (or the reverse)
/// can't be represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no successful join yet
    Unbound,
    /// Joined `room_id` as `user`
    Joined { user: User, room_id: RoomId },
    /// Closed by leave, transport close or eviction
    Closed,
}

/// Registered connection
///
/// Owned by the registry in [`ChatServer`](crate::server::ChatServer); the
/// handler task only holds the receiving end of `sender`.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Server → Client message queue
    sender: mpsc::Sender<ServerMessage>,
    state: ConnectionState,
}

impl Connection {
    /// Create a new unbound connection with the given ID and outbound queue
    pub fn new(id: ConnectionId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            sender,
            state: ConnectionState::Unbound,
        }
    }

    /// Queue a message for this connection without waiting
    ///
    /// A full queue is reported rather than awaited so one slow reader
    /// can't hold up the registry.
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// The joined user, if any
    pub fn user(&self) -> Option<&User> {
        match &self.state {
            ConnectionState::Joined { user, .. } => Some(user),
            _ => None,
        }
    }

    /// The joined room, if any
    pub fn room_id(&self) -> Option<&RoomId> {
        match &self.state {
            ConnectionState::Joined { room_id, .. } => Some(room_id),
            _ => None,
        }
    }

    pub fn is_joined(&self) -> bool {
        matches!(self.state, ConnectionState::Joined { .. })
    }

    /// Bind this connection to a user and room
    ///
    /// Only valid from `Unbound`; a second join is rejected and leaves the
    /// current binding untouched.
    pub fn join(&mut self, user: User, room_id: RoomId) -> Result<(), AppError> {
        match self.state {
            ConnectionState::Unbound => {
                self.state = ConnectionState::Joined { user, room_id };
                Ok(())
            }
            ConnectionState::Joined { .. } => Err(AppError::AlreadyJoined),
            ConnectionState::Closed => Err(AppError::NotJoined),
        }
    }

    /// Update the joined user's typing flag
    pub fn set_typing(&mut self, is_typing: bool) -> Result<&User, AppError> {
        match &mut self.state {
            ConnectionState::Joined { user, .. } => {
                user.is_typing = is_typing;
                Ok(user)
            }
            _ => Err(AppError::NotJoined),
        }
    }

    /// Transition to `Closed`
    ///
    /// Returns the user and room the connection was bound to, exactly once.
    pub fn close(&mut self) -> Option<(User, RoomId)> {
        match std::mem::replace(&mut self.state, ConnectionState::Closed) {
            ConnectionState::Joined { user, room_id } => Some((user, room_id)),
            _ => None,
        }
    }
}
