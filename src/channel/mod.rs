//! Client-side channel
//!
//! Keeps one logical connection to the chat server alive across network
//! failures: queued sends while disconnected, a deterministic reconnect
//! staircase, and state reporting for the caller.

pub mod manager;
pub mod pending;
pub mod transport;

pub use manager::{ChannelManager, ChannelState, ConnectionStatus};
pub use pending::{DeliveryStatus, PendingMessage, PendingMessages};
pub use transport::{Connector, Transport, WebSocketConnector};
