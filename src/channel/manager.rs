//! Auto-reconnecting client channel
//!
//! [`ChannelManager`] is a thin handle; a background worker task owns the
//! transport, the outbound queue and the reconnect timer. The handle's
//! commands, transport frames and the timer all arrive in the worker's
//! single `select!` loop, which is the only place channel state changes.

use std::collections::VecDeque;
use std::future::pending;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::channel::transport::{Connector, Transport, WebSocketConnector};
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::message::{ClientMessage, ServerMessage};

/// Connection status reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Reconnecting,
}

/// Observable channel state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    pub status: ConnectionStatus,
    /// Last failure, if any; `RetriesExhausted` marks the terminal state
    pub error: Option<ChannelError>,
}

impl ChannelState {
    fn new(status: ConnectionStatus, error: Option<ChannelError>) -> Self {
        Self { status, error }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new(ConnectionStatus::Disconnected, None)
    }
}

#[derive(Debug)]
enum ChannelCommand {
    Connect,
    Send(ClientMessage),
    Disconnect,
}

/// Handle to a logical, auto-reconnecting channel
///
/// Dropping the handle stops the worker and closes the transport.
pub struct ChannelManager {
    cmd_tx: mpsc::UnboundedSender<ChannelCommand>,
    state_rx: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl ChannelManager {
    /// Start a channel over WebSocket
    ///
    /// Returns the handle and the receiver for decoded server events.
    /// Nothing is opened until [`connect`](Self::connect) is called.
    pub fn start(config: ChannelConfig) -> (Self, mpsc::Receiver<ServerMessage>) {
        Self::start_with(config, WebSocketConnector)
    }

    /// Start a channel over a custom connector
    pub fn start_with<C: Connector>(
        config: ChannelConfig,
        connector: C,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(ChannelState::default());

        let worker = ChannelWorker {
            config,
            connector,
            transport: None,
            queue: VecDeque::new(),
            attempts: 0,
            intentional: false,
            reconnect_at: None,
            state_tx,
            event_tx,
        };
        let task = tokio::spawn(worker.run(cmd_rx));

        (
            Self {
                cmd_tx,
                state_rx,
                task,
            },
            event_rx,
        )
    }

    /// Open the channel; no-op if already open
    ///
    /// Also re-arms automatic reconnection after [`disconnect`](Self::disconnect)
    /// or an exhausted retry budget.
    pub fn connect(&self) -> Result<(), ChannelError> {
        self.command(ChannelCommand::Connect)
    }

    /// Send now if open, otherwise queue until the next successful open
    pub fn send_message(&self, msg: ClientMessage) -> Result<(), ChannelError> {
        self.command(ChannelCommand::Send(msg))
    }

    /// Close the channel and stop reconnecting
    pub fn disconnect(&self) -> Result<(), ChannelError> {
        self.command(ChannelCommand::Disconnect)
    }

    /// Current state snapshot
    pub fn state(&self) -> ChannelState {
        self.state_rx.borrow().clone()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Stop the worker and wait for it to close the transport
    pub async fn shutdown(self) {
        let Self { cmd_tx, task, .. } = self;
        drop(cmd_tx);
        let _ = task.await;
    }

    fn command(&self, cmd: ChannelCommand) -> Result<(), ChannelError> {
        self.cmd_tx.send(cmd).map_err(|_| ChannelError::Closed)
    }
}

/// Background owner of all channel state
struct ChannelWorker<C> {
    config: ChannelConfig,
    connector: C,
    transport: Option<Box<dyn Transport>>,
    /// Events waiting for an open transport, oldest first
    queue: VecDeque<ClientMessage>,
    /// Reconnects tried since the last successful open
    attempts: u32,
    /// Set by `disconnect`; suppresses reconnection
    intentional: bool,
    reconnect_at: Option<Instant>,
    state_tx: watch::Sender<ChannelState>,
    event_tx: mpsc::Sender<ServerMessage>,
}

impl<C: Connector> ChannelWorker<C> {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ChannelCommand>) {
        debug!("Channel worker started for {}", self.config.url);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        debug!("Channel handle dropped, shutting down");
                        self.close_intentionally().await;
                        break;
                    }
                },
                frame = next_frame(&mut self.transport) => {
                    self.handle_frame(frame);
                }
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.attempts += 1;
                    info!(
                        "Reconnecting (attempt {}/{})",
                        self.attempts,
                        self.config.reconnect.max_attempts
                    );
                    self.open().await;
                }
            }
        }

        debug!("Channel worker stopped");
    }

    async fn handle_command(&mut self, cmd: ChannelCommand) {
        match cmd {
            ChannelCommand::Connect => {
                self.intentional = false;
                if self.transport.is_some() {
                    return;
                }
                // An explicit connect starts a fresh retry budget
                self.reconnect_at = None;
                self.attempts = 0;
                self.open().await;
            }
            ChannelCommand::Send(msg) => {
                if self.transport.is_some() {
                    self.send_now(msg).await;
                } else {
                    debug!("Queueing message (not connected)");
                    self.queue.push_back(msg);
                }
            }
            ChannelCommand::Disconnect => {
                self.close_intentionally().await;
            }
        }
    }

    /// Open a transport, send the hello, flush the queue; or fall into the
    /// reconnect path
    async fn open(&mut self) {
        let connecting = self.connector.connect(&self.config.url);
        let result = match timeout(self.config.connect_timeout, connecting).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Connect(format!(
                "timed out after {}ms",
                self.config.connect_timeout.as_millis()
            ))),
        };

        match result {
            Ok(transport) => {
                info!("Connected to {}", self.config.url);
                self.transport = Some(transport);
                self.attempts = 0;
                self.publish(ConnectionStatus::Connected, None);
                if self.send_hello().await {
                    self.flush_queue().await;
                }
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", self.config.url, e);
                self.handle_close(Some(e));
            }
        }
    }

    /// Send the configured session opener; false if the transport broke
    async fn send_hello(&mut self) -> bool {
        let json = match self.config.hello.as_ref().map(serde_json::to_string) {
            None => return true,
            Some(Ok(json)) => json,
            Some(Err(e)) => {
                error!("Failed to serialize hello: {}", e);
                return true;
            }
        };

        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        match transport.send(json).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Hello failed: {}", e);
                self.handle_close(Some(e));
                false
            }
        }
    }

    async fn send_now(&mut self, msg: ClientMessage) {
        let Some(transport) = self.transport.as_mut() else {
            self.queue.push_back(msg);
            return;
        };

        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                return;
            }
        };

        if let Err(e) = transport.send(json).await {
            warn!("Send failed, requeueing: {}", e);
            self.queue.push_back(msg);
            self.handle_close(Some(e));
        }
    }

    /// Send queued events in order while the transport stays open
    async fn flush_queue(&mut self) {
        if !self.queue.is_empty() {
            debug!("Flushing {} queued messages", self.queue.len());
        }

        while let Some(msg) = self.queue.pop_front() {
            let Some(transport) = self.transport.as_mut() else {
                self.queue.push_front(msg);
                return;
            };

            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Dropping unserializable queued message: {}", e);
                    continue;
                }
            };

            if let Err(e) = transport.send(json).await {
                warn!("Flush interrupted: {}", e);
                self.queue.push_front(msg);
                self.handle_close(Some(e));
                return;
            }
        }
    }

    fn handle_frame(&mut self, frame: Option<Result<String, ChannelError>>) {
        match frame {
            Some(Ok(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(msg) => {
                    if let Err(e) = self.event_tx.try_send(msg) {
                        warn!("Dropping server event: {}", e);
                    }
                }
                Err(e) => {
                    warn!("Failed to parse server message: {} - raw: {}", e, text);
                }
            },
            Some(Err(e)) => {
                warn!("Transport error: {}", e);
                self.handle_close(Some(e));
            }
            None => {
                info!("Connection closed by server");
                self.handle_close(None);
            }
        }
    }

    /// Transport is gone: schedule a reconnect or give up
    fn handle_close(&mut self, cause: Option<ChannelError>) {
        self.transport = None;

        if self.intentional {
            self.publish(ConnectionStatus::Disconnected, None);
            return;
        }

        let policy = &self.config.reconnect;
        if policy.allows(self.attempts) {
            let delay = policy.delay_for(self.attempts);
            info!(
                "Reconnecting in {}ms (attempt {}/{})",
                delay.as_millis(),
                self.attempts + 1,
                policy.max_attempts
            );
            self.reconnect_at = Some(Instant::now() + delay);
            self.publish(ConnectionStatus::Reconnecting, cause);
        } else {
            error!("Max reconnect attempts reached");
            self.reconnect_at = None;
            self.publish(
                ConnectionStatus::Disconnected,
                Some(ChannelError::RetriesExhausted),
            );
        }
    }

    async fn close_intentionally(&mut self) {
        self.intentional = true;
        self.reconnect_at = None;

        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
            info!("Disconnected from {}", self.config.url);
        }

        self.publish(ConnectionStatus::Disconnected, None);
    }

    fn publish(&self, status: ConnectionStatus, error: Option<ChannelError>) {
        debug!("Channel state -> {:?} ({:?})", status, error);
        self.state_tx.send_replace(ChannelState::new(status, error));
    }
}

/// Next frame from the open transport; never resolves while closed
async fn next_frame(
    transport: &mut Option<Box<dyn Transport>>,
) -> Option<Result<String, ChannelError>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => pending().await,
    }
}

/// Resolve at `deadline`; never resolves without one
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
