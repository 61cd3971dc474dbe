// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin demonstration binary: serves one WebSocket route and echoes every
//! request's payload back as a single response. Exists only to prove the
//! library wires together end to end, not as an application deliverable.

use clap::Parser;
use tracing::error;

use coop_message::connection::{handler, ConnectionConfig, HandlerResponse};
use coop_message::server::WebSocketMessageServer;
use coop_message::{init_tracing, MessageConfig};

#[derive(Parser)]
#[command(name = "echo-message-server", version, about = "Echoes every request payload back as a response.")]
struct Cli {
    /// Address to bind the WebSocket server on.
    #[arg(long, default_value = "127.0.0.1:8090", env = "COOP_MESSAGE_ADDR")]
    addr: String,

    #[command(flatten)]
    config: MessageConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.config);

    let connection_config = ConnectionConfig {
        response_timeout: cli.config.response_timeout(),
        sign_salt: cli.config.sign_salt_str().to_owned(),
        marshal_payload: None,
        unmarshal_payload: None,
    };

    let server = WebSocketMessageServer::new(
        cli.config.ws_allowed_paths.clone(),
        connection_config,
        handler(|payload: serde_json::Value| async move { Ok(HandlerResponse::One(payload)) }),
    );

    if let Err(err) = server.serve(&cli.addr).await {
        error!("fatal: {err:#}");
        std::process::exit(1);
    }
}
