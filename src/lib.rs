//! Room-based WebSocket Chat Library
//!
//! A WebSocket chat server built with tokio-tungstenite using the Actor
//! pattern for state management, plus a client channel that survives
//! network failures.
//!
//! # Features
//! - Lazily created rooms keyed by name
//! - Join with member list (`welcome`) and presence (`user_joined`, `user_left`)
//! - Chat messages with sender-only acknowledgment (`message_ack`)
//! - Typing indicators
//! - Admission control (maximum concurrent connections)
//! - Client channel with outbound queueing and a fixed reconnect staircase
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning connections and rooms
//! - Each connection has a `handler` task communicating with the server
//! - Fan-out never waits on a member: a member that can't keep up is closed
//! - `ChannelManager` runs the client side as its own actor
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use room_chat::{serve, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let listener = TcpListener::bind(config.bind_addr()).await.unwrap();
//!     serve(listener, config).await;
//! }
//! ```

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod logger;
pub mod message;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use channel::{
    ChannelManager, ChannelState, ConnectionStatus, DeliveryStatus, PendingMessages,
};
pub use config::{ChannelConfig, ReconnectPolicy, ServerConfig};
pub use connection::{Connection, ConnectionState};
pub use error::{AppError, ChannelError, SendError};
pub use handler::handle_connection;
pub use message::{ClientMessage, ErrorCode, ServerMessage, User};
pub use room::Room;
pub use server::{serve, serve_with, ChatServer, ServerCommand, ServerStats};
pub use types::{ConnectionId, MessageId, RoomId, UserId};
