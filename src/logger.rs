//! Logging setup for the binaries

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise both this crate and `binary_name`
/// log at `default_log_level`, e.g. `room_chat=info,chat_client=info`.
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                default_log_level,
                binary_name.replace('-', "_"),
                default_log_level
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
