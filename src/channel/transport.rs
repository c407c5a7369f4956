//! Transport seam for the client channel
//!
//! The channel worker only sees text frames through [`Transport`], and opens
//! new ones through a [`Connector`]. [`WebSocketConnector`] is the real
//! implementation; tests script their own.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::ChannelError;

/// An open, message-oriented connection
#[async_trait]
pub trait Transport: Send {
    /// Write one text frame
    async fn send(&mut self, text: String) -> Result<(), ChannelError>;

    /// Next text frame; `None` once the peer has closed
    async fn recv(&mut self) -> Option<Result<String, ChannelError>>;

    /// Close from our side
    async fn close(&mut self);
}

/// Opens transports to an endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ChannelError>;
}

/// Connects over WebSocket with tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ChannelError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        debug!("WebSocket handshake with {} complete", url);
        Ok(Box::new(WebSocketTransport { stream }))
    }
}

struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server sent close frame: {:?}", frame);
                    return None;
                }
                // Ping/Pong are answered by tungstenite; binary isn't part of the protocol
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(ChannelError::Receive(e.to_string()))),
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
