//! ChatServer Actor implementation
//!
//! The central actor that owns the connection registry and the room table.
//! Uses the Actor pattern with mpsc channels for message passing, so every
//! join/leave/close is serialized without locks.

use std::collections::HashMap;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::message::{validate_content, validate_username, ServerMessage, User};
use crate::room::Room;
use crate::types::{ConnectionId, MessageId, RoomId};

/// Channel buffer size for server commands
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Commands sent from handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New transport accepted
    Connect {
        connection_id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Transport closed
    Disconnect { connection_id: ConnectionId },
    /// Join a room
    Join {
        connection_id: ConnectionId,
        username: String,
        room_id: RoomId,
    },
    /// Send a chat message
    Message {
        connection_id: ConnectionId,
        content: String,
        temp_id: String,
    },
    /// Typing indicator changed
    Typing {
        connection_id: ConnectionId,
        is_typing: bool,
    },
    /// Leave the room and end the session
    Leave { connection_id: ConnectionId },
    /// Inbound frame failed to decode
    Malformed {
        connection_id: ConnectionId,
        reason: String,
    },
    /// Snapshot registry counters
    Stats { reply: oneshot::Sender<ServerStats> },
}

/// Registry counters at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Registered connections, joined or not
    pub connections: usize,
    /// Member count per live room
    pub rooms: HashMap<RoomId, usize>,
}

impl ServerStats {
    /// Member count of a room, zero if it doesn't exist
    pub fn room_members(&self, room_id: &str) -> usize {
        self.rooms
            .get(&RoomId::new(room_id))
            .copied()
            .unwrap_or(0)
    }
}

/// The main ChatServer actor
///
/// Rooms only hold connection ids; users are read from the connections
/// when a member list is needed, so the two tables can't disagree about
/// who is where.
pub struct ChatServer {
    /// All registered connections: ConnectionId -> Connection
    connections: HashMap<ConnectionId, Connection>,
    /// All live rooms: RoomId -> Room
    rooms: HashMap<RoomId, Room>,
    /// Admission limit
    max_connections: usize,
    /// Connections whose queue refused a message; closed after the current command
    failed: Vec<ConnectionId>,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(receiver: mpsc::Receiver<ServerCommand>, max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            rooms: HashMap::new(),
            max_connections,
            failed: Vec::new(),
            receiver,
        }
    }

    /// Spawn the actor and return its command channel
    pub fn spawn(max_connections: usize) -> mpsc::Sender<ServerCommand> {
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        tokio::spawn(ChatServer::new(cmd_rx, max_connections).run());
        cmd_tx
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started (max {} connections)", self.max_connections);

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command, then close any member that fell behind
    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect {
                connection_id,
                sender,
            } => {
                self.handle_connect(connection_id, sender);
            }
            ServerCommand::Disconnect { connection_id } => {
                self.close_connection(connection_id);
            }
            ServerCommand::Join {
                connection_id,
                username,
                room_id,
            } => {
                self.handle_join(connection_id, username, room_id);
            }
            ServerCommand::Message {
                connection_id,
                content,
                temp_id,
            } => {
                self.handle_message(connection_id, content, temp_id);
            }
            ServerCommand::Typing {
                connection_id,
                is_typing,
            } => {
                self.handle_typing(connection_id, is_typing);
            }
            ServerCommand::Leave { connection_id } => {
                info!("Connection {} left", connection_id);
                self.close_connection(connection_id);
            }
            ServerCommand::Malformed {
                connection_id,
                reason,
            } => {
                self.deliver(connection_id, AppError::Malformed(reason).into());
            }
            ServerCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }

        self.close_failed();
    }

    /// Handle new transport
    fn handle_connect(&mut self, connection_id: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        if self.connections.len() >= self.max_connections {
            warn!(
                "Rejecting connection {}: {} connections registered",
                connection_id,
                self.connections.len()
            );
            // Dropping the sender after this closes the transport
            let _ = sender.try_send(AppError::MaxConnections.into());
            return;
        }

        if self.connections.contains_key(&connection_id) {
            error!("Duplicate connection id {}, rejecting", connection_id);
            return;
        }

        info!("Connection {} registered", connection_id);
        self.connections
            .insert(connection_id, Connection::new(connection_id, sender));
        debug!(
            "Total connections: {}, Total rooms: {}",
            self.connections.len(),
            self.rooms.len()
        );
    }

    /// Handle room join
    fn handle_join(&mut self, connection_id: ConnectionId, username: String, room_id: RoomId) {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return;
        };

        if connection.is_joined() {
            self.deliver(connection_id, AppError::AlreadyJoined.into());
            return;
        }

        if let Err(e) = validate_username(&username) {
            self.deliver(connection_id, e.into());
            return;
        }

        let user = User::new(username);
        if let Err(e) = connection.join(user.clone(), room_id.clone()) {
            self.deliver(connection_id, e.into());
            return;
        }

        self.rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                debug!("Room {} created", room_id);
                Room::new(room_id.clone())
            })
            .add_member(connection_id);

        info!(
            "User {} ({}) joined room {}",
            user.username, user.id, room_id
        );

        let users = self.users_in(&room_id);

        // Welcome goes out before anyone else hears about the join
        self.deliver(
            connection_id,
            ServerMessage::Welcome {
                user_id: user.id,
                users: users.clone(),
            },
        );
        self.broadcast(
            &room_id,
            ServerMessage::UserJoined { user, users },
            Some(connection_id),
        );
    }

    /// Handle chat message
    fn handle_message(&mut self, connection_id: ConnectionId, content: String, temp_id: String) {
        let Some(connection) = self.connections.get(&connection_id) else {
            return;
        };

        let (Some(user), Some(room_id)) = (connection.user(), connection.room_id()) else {
            self.deliver(connection_id, AppError::NotJoined.into());
            return;
        };
        let (user, room_id) = (user.clone(), room_id.clone());

        if let Err(e) = validate_content(&content) {
            self.deliver(connection_id, e.into());
            return;
        }

        let message_id = MessageId::new();
        debug!("Message {} from {} in {}", message_id, user.username, room_id);

        self.deliver(
            connection_id,
            ServerMessage::MessageAck {
                temp_id,
                message_id,
            },
        );
        self.broadcast(
            &room_id,
            ServerMessage::Message {
                id: message_id,
                user_id: user.id,
                username: user.username,
                content,
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
            None,
        );
    }

    /// Handle typing indicator
    fn handle_typing(&mut self, connection_id: ConnectionId, is_typing: bool) {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return;
        };

        let user = match connection.set_typing(is_typing).cloned() {
            Ok(user) => user,
            Err(e) => {
                self.deliver(connection_id, e.into());
                return;
            }
        };
        let Some(room_id) = connection.room_id().cloned() else {
            return;
        };

        self.broadcast(
            &room_id,
            ServerMessage::UserTyping {
                user_id: user.id,
                username: user.username,
                is_typing,
            },
            Some(connection_id),
        );
    }

    /// Remove a connection, cleaning up its room membership
    ///
    /// Idempotent: unknown or already-removed ids are ignored, so a
    /// leave followed by a transport close only announces the departure once.
    fn close_connection(&mut self, connection_id: ConnectionId) {
        let Some(mut connection) = self.connections.remove(&connection_id) else {
            return;
        };

        info!("Connection {} closed", connection_id);

        if let Some((user, room_id)) = connection.close() {
            self.remove_from_room(connection_id, &user, &room_id);
        }

        debug!(
            "Total connections: {}, Total rooms: {}",
            self.connections.len(),
            self.rooms.len()
        );
    }

    /// Helper: drop a member from its room, deleting the room if it empties
    fn remove_from_room(&mut self, connection_id: ConnectionId, user: &User, room_id: &RoomId) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };

        room.remove_member(connection_id);

        if room.is_empty() {
            self.rooms.remove(room_id);
            debug!("Room {} deleted (empty)", room_id);
            return;
        }

        info!("User {} ({}) left room {}", user.username, user.id, room_id);
        let users = self.users_in(room_id);
        self.broadcast(
            room_id,
            ServerMessage::UserLeft {
                user_id: user.id,
                users,
            },
            None,
        );
    }

    /// Helper: current users of a room, in join order
    fn users_in(&self, room_id: &RoomId) -> Vec<User> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };

        room.members()
            .iter()
            .filter_map(|id| self.connections.get(id).and_then(|c| c.user().cloned()))
            .collect()
    }

    /// Helper: queue a message for one connection
    ///
    /// A refused send marks the connection for closing instead of waiting on it.
    fn deliver(&mut self, connection_id: ConnectionId, msg: ServerMessage) {
        let Some(connection) = self.connections.get(&connection_id) else {
            return;
        };

        if let Err(e) = connection.send(msg) {
            warn!("Dropping connection {}: {}", connection_id, e);
            self.failed.push(connection_id);
        }
    }

    /// Helper: queue a message for every room member except `exclude`
    fn broadcast(&mut self, room_id: &RoomId, msg: ServerMessage, exclude: Option<ConnectionId>) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };

        let targets: Vec<ConnectionId> = match exclude {
            Some(sender) => room.others(sender).collect(),
            None => room.members().to_vec(),
        };

        for target in targets {
            self.deliver(target, msg.clone());
        }
    }

    /// Helper: run the close path for every connection that fell behind
    ///
    /// Closing one may announce a departure that fails on another, so
    /// this drains until nothing new fails.
    fn close_failed(&mut self) {
        while let Some(connection_id) = self.failed.pop() {
            self.close_connection(connection_id);
        }
    }

    fn stats(&self) -> ServerStats {
        ServerStats {
            connections: self.connections.len(),
            rooms: self
                .rooms
                .iter()
                .map(|(id, room)| (id.clone(), room.member_count()))
                .collect(),
        }
    }
}

/// Accept connections on `listener` forever
///
/// Spawns the ChatServer actor and one handler task per accepted stream.
pub async fn serve(listener: TcpListener, config: ServerConfig) {
    let cmd_tx = ChatServer::spawn(config.max_connections);
    info!("ChatServer actor started");

    serve_with(listener, cmd_tx, config.outbound_buffer).await;
}

/// Accept loop feeding an already running ChatServer
///
/// `outbound_buffer` is raised to 1 if zero.
pub async fn serve_with(
    listener: TcpListener,
    cmd_tx: mpsc::Sender<ServerCommand>,
    outbound_buffer: usize,
) {
    let outbound_buffer = outbound_buffer.max(1);
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                let cmd_tx = cmd_tx.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, cmd_tx, outbound_buffer).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
