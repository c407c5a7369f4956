//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's adjacently tagged
//! enums: every frame is `{"type": "...", "payload": {...}}` with snake_case
//! tags and camelCase payload fields.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::types::{MessageId, RoomId, UserId};

/// Accepted username length, in characters
pub const USERNAME_LENGTH: RangeInclusive<usize> = 2..=20;

/// Accepted chat message length, in characters
pub const CONTENT_LENGTH: RangeInclusive<usize> = 1..=1000;

/// A joined user as seen by the other members of the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub is_typing: bool,
}

impl User {
    /// Allocate a fresh user with a new id
    pub fn new(username: String) -> Self {
        Self {
            id: UserId::new(),
            username,
            is_typing: false,
        }
    }
}

/// Client → Server message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Join (and lazily create) a room under a display name
    Join { username: String, room_id: RoomId },
    /// Send a chat message; `temp_id` is echoed back in the ack
    Message { content: String, temp_id: String },
    /// Typing indicator on/off
    Typing { is_typing: bool },
    /// Leave the room and end the session
    Leave {},
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Join accepted: the new user id and the room's members after the join
    Welcome { user_id: UserId, users: Vec<User> },
    /// Chat message broadcast to the whole room
    Message {
        id: MessageId,
        user_id: UserId,
        username: String,
        content: String,
        /// Milliseconds since the Unix epoch
        timestamp: i64,
    },
    /// Sender-only confirmation mapping the client's temp id to the real one
    MessageAck {
        temp_id: String,
        message_id: MessageId,
    },
    /// Another user joined the room
    UserJoined { user: User, users: Vec<User> },
    /// A user left the room (or disconnected)
    UserLeft { user_id: UserId, users: Vec<User> },
    /// Another user started or stopped typing
    UserTyping {
        user_id: UserId,
        username: String,
        is_typing: bool,
    },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Server is at capacity; the connection is closed
    MaxConnections,
    /// Username length outside the accepted range
    InvalidUsername,
    /// Message content empty or too long
    InvalidMessage,
    /// Frame could not be decoded as a client message
    MalformedMessage,
    /// Join sent on a connection that already joined
    AlreadyJoined,
    /// Room operation sent before joining
    NotJoined,
}

/// Check a join username against [`USERNAME_LENGTH`]
pub fn validate_username(username: &str) -> Result<(), AppError> {
    if USERNAME_LENGTH.contains(&username.chars().count()) {
        Ok(())
    } else {
        Err(AppError::InvalidUsername)
    }
}

/// Check chat content against [`CONTENT_LENGTH`]
pub fn validate_content(content: &str) -> Result<(), AppError> {
    if CONTENT_LENGTH.contains(&content.chars().count()) {
        Ok(())
    } else {
        Err(AppError::InvalidMessage)
    }
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let (code, message) = match &err {
            AppError::MaxConnections => (
                ErrorCode::MaxConnections,
                "Server has reached maximum connections".to_string(),
            ),
            AppError::InvalidUsername => (
                ErrorCode::InvalidUsername,
                format!(
                    "Username must be between {} and {} characters",
                    USERNAME_LENGTH.start(),
                    USERNAME_LENGTH.end()
                ),
            ),
            AppError::InvalidMessage => (
                ErrorCode::InvalidMessage,
                format!(
                    "Message must be between {} and {} characters",
                    CONTENT_LENGTH.start(),
                    CONTENT_LENGTH.end()
                ),
            ),
            AppError::AlreadyJoined => {
                (ErrorCode::AlreadyJoined, "You have already joined a room".to_string())
            }
            AppError::NotJoined => (ErrorCode::NotJoined, "You have not joined a room".to_string()),
            AppError::Malformed(reason) => {
                (ErrorCode::MalformedMessage, format!("Invalid message format: {}", reason))
            }
            // Fatal errors are not typically converted (connection closes)
            _ => (ErrorCode::MalformedMessage, "Internal error".to_string()),
        };
        ServerMessage::Error { code, message }
    }
}
