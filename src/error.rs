//! Error types for the chat server and client channel
//!
//! Defines application-level errors, per-connection send errors and
//! client channel errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// validation errors (send error message to client).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Server is at its connection limit
    #[error("Maximum connections reached")]
    MaxConnections,

    /// Username length outside the accepted range
    #[error("Invalid username")]
    InvalidUsername,

    /// Message content empty or too long
    #[error("Invalid message content")]
    InvalidMessage,

    /// Inbound frame could not be decoded
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Join attempted on an already-joined connection
    #[error("Already joined")]
    AlreadyJoined,

    /// Room operation attempted before joining
    #[error("Not joined")]
    NotJoined,
}

/// Message send errors
///
/// Occurs when a connection's outbound queue can't take another message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The connection isn't draining its queue fast enough
    #[error("Outbound queue full")]
    QueueFull,
}

/// Client channel errors
///
/// None of these escape the channel worker; they are logged, drive
/// reconnection, or end up as the `error` of a [`ChannelState`].
///
/// [`ChannelState`]: crate::channel::ChannelState
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Opening the transport failed
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Writing a frame to an open transport failed
    #[error("Send failed: {0}")]
    Send(String),

    /// Reading from the transport failed
    #[error("Receive failed: {0}")]
    Receive(String),

    /// Retry budget exhausted
    #[error("Unable to connect to chat server")]
    RetriesExhausted,

    /// The background worker is gone
    #[error("Channel closed")]
    Closed,
}
