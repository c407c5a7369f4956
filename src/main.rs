//! Room Chat Server - Entry Point
//!
//! Starts the TCP listener and ChatServer actor, accepting connections.

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use room_chat::config::{DEFAULT_HOST, DEFAULT_MAX_CONNECTIONS, DEFAULT_OUTBOUND_BUFFER, DEFAULT_PORT};
use room_chat::logger::setup_logger;
use room_chat::{serve, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "room_chat")]
#[command(about = "Room-based WebSocket chat server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "WS_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "WS_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Connections beyond this are rejected with MAX_CONNECTIONS
    #[arg(long, env = "WS_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Per-connection outbound queue size; members that fall this far behind are dropped
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_BUFFER)]
    outbound_buffer: usize,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            max_connections: args.max_connections,
            outbound_buffer: args.outbound_buffer,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG to override, e.g. RUST_LOG=room_chat=debug
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let config = ServerConfig::from(Args::parse());

    // Start TCP listener
    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("WebSocket Chat Server listening on {}", config.bind_addr());

    tokio::select! {
        _ = serve(listener, config) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
