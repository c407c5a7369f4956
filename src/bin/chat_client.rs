//! Line-based chat client on top of `ChannelManager`.
//!
//! Joins a room, prints room events, and sends each stdin line as a chat
//! message. Survives server restarts: the join is the channel's hello, so
//! every new session rejoins before lines typed while offline go out.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin chat_client -- --username alice
//! cargo run --bin chat_client -- -u bob -r kitchen --url ws://127.0.0.1:3001
//! ```
//!
//! `/quit` leaves the room and exits.

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use room_chat::config::DEFAULT_MAX_RECONNECT_ATTEMPTS;
use room_chat::logger::setup_logger;
use room_chat::{
    ChannelConfig, ChannelError, ChannelManager, ClientMessage, ConnectionStatus,
    PendingMessages, RoomId, ServerMessage, User,
};

#[derive(Parser, Debug)]
#[command(name = "chat_client")]
#[command(about = "Room chat client with automatic reconnection", long_about = None)]
struct Args {
    /// Display name (2-20 characters)
    #[arg(short = 'u', long)]
    username: String,

    /// Room to join
    #[arg(short = 'r', long, default_value = "lobby")]
    room: String,

    /// WebSocket server URL
    #[arg(long, env = "WS_URL", default_value = "ws://127.0.0.1:3001")]
    url: String,

    /// Give up after this many failed reconnects
    #[arg(long, default_value_t = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    max_reconnect_attempts: u32,
}

fn names(users: &[User]) -> String {
    users
        .iter()
        .map(|u| u.username.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print one server event
fn render(msg: ServerMessage, pending: &mut PendingMessages) {
    match msg {
        ServerMessage::Welcome { users, .. } => {
            println!("* joined, {} online: {}", users.len(), names(&users));
        }
        ServerMessage::Message {
            id,
            username,
            content,
            ..
        } => {
            // Our own message was already printed when sent
            if !pending.is_own(id) {
                println!("[{}] {}", username, content);
            }
        }
        ServerMessage::MessageAck {
            temp_id,
            message_id,
        } => {
            if pending.acknowledge(&temp_id, message_id).is_none() {
                info!("Ack for unknown message {}", temp_id);
            }
        }
        ServerMessage::UserJoined { user, users } => {
            println!("* {} joined ({} online)", user.username, users.len());
        }
        ServerMessage::UserLeft { users, .. } => {
            println!("* someone left, online: {}", names(&users));
        }
        ServerMessage::UserTyping {
            username,
            is_typing,
            ..
        } => {
            if is_typing {
                println!("* {} is typing...", username);
            }
        }
        ServerMessage::Error { code, message } => {
            println!("! {:?}: {}", code, message);
            let failed = pending.reject(code);
            if failed > 0 {
                println!("! {} messages not delivered", failed);
            }
        }
    }
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "warn");

    let args = Args::parse();
    let join = ClientMessage::Join {
        username: args.username,
        room_id: RoomId::new(args.room),
    };
    let config = ChannelConfig::new(args.url)
        .with_max_reconnect_attempts(args.max_reconnect_attempts)
        .with_hello(join);

    let (channel, mut events) = ChannelManager::start(config);
    let mut state = channel.subscribe();
    let mut pending = PendingMessages::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if let Err(e) = channel.connect() {
        error!("Client error: {}", e);
        std::process::exit(1);
    }

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                match current.status {
                    ConnectionStatus::Connected => {}
                    ConnectionStatus::Reconnecting => {
                        println!("* connection lost, reconnecting...");
                    }
                    ConnectionStatus::Disconnected => {
                        if current.error == Some(ChannelError::RetriesExhausted) {
                            let failed = pending.fail_sending();
                            println!("! could not reach the server ({} messages not delivered)", failed);
                            break;
                        }
                    }
                }
            }
            Some(msg) = events.recv() => {
                render(msg, &mut pending);
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    // EOF or unreadable stdin
                    _ => break,
                };
                let line = line.trim();
                match line {
                    "" => {}
                    "/quit" => {
                        let _ = channel.send_message(ClientMessage::Leave {});
                        break;
                    }
                    content => {
                        let _ = channel.send_message(pending.track(content));
                    }
                }
            }
        }
    }

    let _ = channel.disconnect();
    channel.shutdown().await;
}
