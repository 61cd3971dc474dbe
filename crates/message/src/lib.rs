// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `coop-message`: a bidirectional, transport-agnostic request/response RPC
//! runtime. Either endpoint of a connection may act as requester or
//! responder, and a single request may yield zero, one, or many streamed
//! responses.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod queue;
pub mod server;
pub mod signer;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::WebSocketMessageClient;
pub use config::MessageConfig;
pub use connection::MessageConnection;
pub use error::{Anomaly, MessageError};
pub use server::WebSocketMessageServer;

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber from `config`. Priority:
/// `COOP_MESSAGE_LOG_LEVEL` / `RUST_LOG`, then `config.log_level`, then
/// `info`. Uses `try_init` so it is safe to call more than once (tests call
/// it from multiple places).
pub fn init_tracing(config: &MessageConfig) {
    use tracing_subscriber::fmt;

    let level = config.log_level.as_deref().unwrap_or("info");
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_owned()));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}
