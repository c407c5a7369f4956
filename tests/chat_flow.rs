//! End-to-end tests over real WebSockets on an ephemeral localhost port.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use room_chat::{
    serve_with, ChannelConfig, ChannelManager, ChatServer, ClientMessage, ConnectionStatus,
    DeliveryStatus, ErrorCode, PendingMessages, RoomId, ServerCommand, ServerMessage,
    ServerStats,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    url: String,
    cmd_tx: mpsc::Sender<ServerCommand>,
}

impl TestServer {
    async fn start(max_connections: usize) -> Self {
        Self::start_with_buffer(max_connections, 64).await
    }

    async fn start_with_buffer(max_connections: usize, outbound_buffer: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let cmd_tx = ChatServer::spawn(max_connections);
        tokio::spawn(serve_with(listener, cmd_tx.clone(), outbound_buffer));
        Self { url, cmd_tx }
    }

    async fn stats(&self) -> ServerStats {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(ServerCommand::Stats { reply }).await.unwrap();
        rx.await.unwrap()
    }

    async fn client(&self) -> Ws {
        let (ws, _) = connect_async(self.url.as_str()).await.unwrap();
        ws
    }
}

async fn send(ws: &mut Ws, msg: &ClientMessage) {
    let json = serde_json::to_string(msg).unwrap();
    ws.send(Message::Text(json.into())).await.unwrap();
}

/// Next protocol message; panics on close or timeout
async fn recv(ws: &mut Ws) -> ServerMessage {
    loop {
        let frame = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for server")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// True once the server has closed the socket
async fn closed(ws: &mut Ws) -> bool {
    loop {
        match timeout(WAIT, ws.next()).await {
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
            Err(_) => return false,
        }
    }
}

fn join(username: &str, room: &str) -> ClientMessage {
    ClientMessage::Join {
        username: username.to_string(),
        room_id: RoomId::new(room),
    }
}

fn usernames(msg: &ServerMessage) -> Vec<String> {
    let users = match msg {
        ServerMessage::Welcome { users, .. }
        | ServerMessage::UserJoined { users, .. }
        | ServerMessage::UserLeft { users, .. } => users,
        other => panic!("no member list in {:?}", other),
    };
    users.iter().map(|u| u.username.clone()).collect()
}

#[tokio::test]
async fn test_lobby_scenario() {
    let server = TestServer::start(100).await;
    let mut a = server.client().await;
    let mut b = server.client().await;

    send(&mut a, &join("alice", "lobby")).await;
    let welcome_a = recv(&mut a).await;
    let alice_id = match &welcome_a {
        ServerMessage::Welcome { user_id, users } => {
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].id, *user_id);
            *user_id
        }
        other => panic!("unexpected {:?}", other),
    };

    send(&mut b, &join("bob", "lobby")).await;
    let welcome_b = recv(&mut b).await;
    let bob_id = match &welcome_b {
        ServerMessage::Welcome { user_id, .. } => *user_id,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(usernames(&welcome_b), vec!["alice", "bob"]);

    let joined = recv(&mut a).await;
    assert!(matches!(&joined, ServerMessage::UserJoined { user, .. } if user.username == "bob"));
    assert_eq!(usernames(&joined), usernames(&welcome_b));

    send(
        &mut a,
        &ClientMessage::Message {
            content: "hi".to_string(),
            temp_id: "t1".to_string(),
        },
    )
    .await;

    let acked = match recv(&mut a).await {
        ServerMessage::MessageAck {
            temp_id,
            message_id,
        } => {
            assert_eq!(temp_id, "t1");
            message_id
        }
        other => panic!("unexpected {:?}", other),
    };
    match recv(&mut b).await {
        ServerMessage::Message {
            id,
            user_id,
            username,
            content,
            ..
        } => {
            assert_eq!(id, acked);
            assert_eq!(user_id, alice_id);
            assert_eq!(username, "alice");
            assert_eq!(content, "hi");
        }
        other => panic!("unexpected {:?}", other),
    }
    // Sender receives the broadcast copy too
    assert!(matches!(recv(&mut a).await, ServerMessage::Message { id, .. } if id == acked));

    // Abrupt disconnect
    drop(b);
    let left = recv(&mut a).await;
    assert!(matches!(left, ServerMessage::UserLeft { user_id, .. } if user_id == bob_id));
    assert_eq!(usernames(&left), vec!["alice"]);

    let stats = server.stats().await;
    assert_eq!(stats.room_members("lobby"), 1);
    assert_eq!(stats.connections, 1);
}

#[tokio::test]
async fn test_short_username_rejected() {
    let server = TestServer::start(100).await;
    let mut a = server.client().await;
    let mut watcher = server.client().await;
    send(&mut watcher, &join("watcher", "lobby")).await;
    recv(&mut watcher).await;

    send(&mut a, &join("a", "lobby")).await;
    match recv(&mut a).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidUsername),
        other => panic!("unexpected {:?}", other),
    }

    // Still usable: a valid join now succeeds, and the watcher hears only that one
    send(&mut a, &join("alice", "lobby")).await;
    assert!(matches!(recv(&mut a).await, ServerMessage::Welcome { .. }));
    assert!(matches!(
        recv(&mut watcher).await,
        ServerMessage::UserJoined { user, .. } if user.username == "alice"
    ));
}

#[tokio::test]
async fn test_malformed_frame_gets_distinct_code() {
    let server = TestServer::start(100).await;
    let mut a = server.client().await;

    a.send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();
    match recv(&mut a).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::MalformedMessage),
        other => panic!("unexpected {:?}", other),
    }

    send(&mut a, &join("alice", "lobby")).await;
    assert!(matches!(recv(&mut a).await, ServerMessage::Welcome { .. }));
}

#[tokio::test]
async fn test_binary_frame_gets_malformed_code() {
    let server = TestServer::start(100).await;
    let mut a = server.client().await;

    a.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    match recv(&mut a).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::MalformedMessage),
        other => panic!("unexpected {:?}", other),
    }

    send(&mut a, &join("alice", "lobby")).await;
    assert!(matches!(recv(&mut a).await, ServerMessage::Welcome { .. }));
}

#[tokio::test]
async fn test_zero_outbound_buffer_is_usable() {
    let server = TestServer::start_with_buffer(100, 0).await;
    let mut a = server.client().await;

    send(&mut a, &join("alice", "lobby")).await;
    assert!(matches!(recv(&mut a).await, ServerMessage::Welcome { .. }));
}

#[tokio::test]
async fn test_connection_limit() {
    let server = TestServer::start(1).await;
    let mut a = server.client().await;
    send(&mut a, &join("alice", "lobby")).await;
    recv(&mut a).await;

    let mut b = server.client().await;
    match recv(&mut b).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::MaxConnections),
        other => panic!("unexpected {:?}", other),
    }
    assert!(closed(&mut b).await);
    assert_eq!(server.stats().await.connections, 1);
}

#[tokio::test]
async fn test_leave_announces_and_closes() {
    let server = TestServer::start(100).await;
    let mut a = server.client().await;
    let mut b = server.client().await;
    send(&mut a, &join("alice", "lobby")).await;
    recv(&mut a).await;
    send(&mut b, &join("bob", "lobby")).await;
    recv(&mut b).await;
    recv(&mut a).await;

    send(&mut b, &ClientMessage::Leave {}).await;
    assert!(matches!(recv(&mut a).await, ServerMessage::UserLeft { .. }));
    assert!(closed(&mut b).await);

    drop(a);
    // Let the close reach the actor
    for _ in 0..50 {
        if server.stats().await.rooms.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let stats = server.stats().await;
    assert!(stats.rooms.is_empty());
    assert_eq!(stats.connections, 0);
}

#[tokio::test]
async fn test_channel_manager_flushes_join_on_connect() {
    let server = TestServer::start(100).await;
    let (channel, mut events) = ChannelManager::start(ChannelConfig::new(server.url.clone()));

    channel.send_message(join("carol", "lobby")).unwrap();
    channel.connect().unwrap();

    let welcome = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(usernames(&welcome), vec!["carol"]);
    assert_eq!(channel.state().status, ConnectionStatus::Connected);

    channel
        .send_message(ClientMessage::Message {
            content: "queued no more".to_string(),
            temp_id: "t1".to_string(),
        })
        .unwrap();
    assert!(matches!(
        timeout(WAIT, events.recv()).await.unwrap(),
        Some(ServerMessage::MessageAck { temp_id, .. }) if temp_id == "t1"
    ));

    channel.disconnect().unwrap();
    let mut state = channel.subscribe();
    timeout(WAIT, state.wait_for(|s| s.status == ConnectionStatus::Disconnected && s.error.is_none()))
        .await
        .unwrap()
        .unwrap();
    channel.shutdown().await;
}

#[tokio::test]
async fn test_messages_typed_offline_land_after_rejoin() {
    let server = TestServer::start(100).await;
    let config = ChannelConfig::new(server.url.clone()).with_hello(join("dave", "lobby"));
    let (channel, mut events) = ChannelManager::start(config);
    let mut pending = PendingMessages::new();

    let offline = pending.track("written before connecting");
    let temp = match &offline {
        ClientMessage::Message { temp_id, .. } => temp_id.clone(),
        other => panic!("unexpected {:?}", other),
    };
    channel.send_message(offline).unwrap();
    channel.connect().unwrap();

    let welcome = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(usernames(&welcome), vec!["dave"]);

    match timeout(WAIT, events.recv()).await.unwrap() {
        Some(ServerMessage::MessageAck {
            temp_id,
            message_id,
        }) => {
            assert_eq!(temp_id, temp);
            pending.acknowledge(&temp_id, message_id);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(pending.get(&temp).unwrap().status, DeliveryStatus::Sent);
    assert!(matches!(
        timeout(WAIT, events.recv()).await.unwrap(),
        Some(ServerMessage::Message { username, .. }) if username == "dave"
    ));

    channel.shutdown().await;
}

#[tokio::test]
async fn test_messages_without_join_are_rejected_and_failed() {
    let server = TestServer::start(100).await;
    let (channel, mut events) = ChannelManager::start(ChannelConfig::new(server.url.clone()));
    let mut pending = PendingMessages::new();

    let offline = pending.track("nobody is listening");
    let temp = match &offline {
        ClientMessage::Message { temp_id, .. } => temp_id.clone(),
        other => panic!("unexpected {:?}", other),
    };
    channel.send_message(offline).unwrap();
    channel.connect().unwrap();

    match timeout(WAIT, events.recv()).await.unwrap() {
        Some(ServerMessage::Error { code, .. }) => {
            assert_eq!(code, ErrorCode::NotJoined);
            assert_eq!(pending.reject(code), 1);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(pending.get(&temp).unwrap().status, DeliveryStatus::Failed);

    channel.shutdown().await;
}
