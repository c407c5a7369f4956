//! WebSocket connection handler
//!
//! Handles individual transports: WebSocket handshake, envelope decoding,
//! and bidirectional communication with the ChatServer.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::message::{ClientMessage, ServerMessage};
use crate::server::ServerCommand;
use crate::types::ConnectionId;

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, registers the connection with the
/// ChatServer and pumps frames both ways until either side is done.
/// The ChatServer ends the session by dropping the connection's sender
/// (leave, eviction or admission rejection); the client ends it by closing
/// the socket.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
    outbound_buffer: usize,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let connection_id = ConnectionId::new();
    info!("Connection {} accepted from {}", connection_id, peer_addr);

    // Create channel for server -> client messages
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(outbound_buffer);

    // Register with ChatServer
    if cmd_tx
        .send(ServerCommand::Connect {
            connection_id,
            sender: msg_tx,
        })
        .await
        .is_err()
    {
        error!("Failed to register connection {} - server closed", connection_id);
        return Err(AppError::ChannelSend);
    }

    // Clone cmd_tx for read task
    let cmd_tx_read = cmd_tx.clone();

    // Spawn read task (WebSocket -> ServerCommand)
    let mut read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            let cmd = match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => client_message_to_command(connection_id, client_msg),
                    Err(e) => {
                        warn!("Invalid JSON from {}: {}", connection_id, e);
                        ServerCommand::Malformed {
                            connection_id,
                            reason: e.to_string(),
                        }
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("Connection {} sent close frame", connection_id);
                    break;
                }
                Ok(Message::Binary(_)) => {
                    warn!("Binary frame from {}", connection_id);
                    ServerCommand::Malformed {
                        connection_id,
                        reason: "binary frames are not supported".to_string(),
                    }
                }
                Ok(_) => {
                    // Ping/Pong - answered by tungstenite
                    continue;
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", connection_id, e);
                    break;
                }
            };

            if cmd_tx_read.send(cmd).await.is_err() {
                debug!("Server closed, ending read task for {}", connection_id);
                break;
            }
        }
        debug!("Read task ended for {}", connection_id);
    });

    // Spawn write task (ServerMessage -> WebSocket)
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    // Continue - don't break on serialization errors
                }
            }
        }
        debug!("Write task ended for {}", connection_id);

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", connection_id);
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", connection_id);
            read_task.abort();
        }
    }

    // No-op if the ChatServer already closed this connection
    let _ = cmd_tx
        .send(ServerCommand::Disconnect { connection_id })
        .await;

    info!("Connection {} finished", connection_id);

    Ok(())
}

/// Convert a ClientMessage to a ServerCommand
fn client_message_to_command(connection_id: ConnectionId, msg: ClientMessage) -> ServerCommand {
    match msg {
        ClientMessage::Join { username, room_id } => ServerCommand::Join {
            connection_id,
            username,
            room_id,
        },
        ClientMessage::Message { content, temp_id } => ServerCommand::Message {
            connection_id,
            content,
            temp_id,
        },
        ClientMessage::Typing { is_typing } => ServerCommand::Typing {
            connection_id,
            is_typing,
        },
        ClientMessage::Leave {} => ServerCommand::Leave { connection_id },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoomId;

    #[test]
    fn test_join_maps_to_command() {
        let id = ConnectionId::new();
        let cmd = client_message_to_command(
            id,
            ClientMessage::Join {
                username: "alice".to_string(),
                room_id: RoomId::new("lobby"),
            },
        );
        match cmd {
            ServerCommand::Join {
                connection_id,
                username,
                room_id,
            } => {
                assert_eq!(connection_id, id);
                assert_eq!(username, "alice");
                assert_eq!(room_id.as_str(), "lobby");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_leave_maps_to_command() {
        let id = ConnectionId::new();
        assert!(matches!(
            client_message_to_command(id, ClientMessage::Leave {}),
            ServerCommand::Leave { connection_id } if connection_id == id
        ));
    }
}
