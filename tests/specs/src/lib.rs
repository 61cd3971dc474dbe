// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for end-to-end `coop-message` scenarios: spins up a real
//! [`WebSocketMessageServer`] on an ephemeral port with an application
//! handler supplied by the test, and returns its address.

use std::sync::Arc;
use std::time::Duration;

use coop_message::connection::{ConnectionConfig, ReceiveFn};
use coop_message::server::WebSocketMessageServer;

/// Starts `server` on an ephemeral localhost port and returns its address
/// once the listener is accepting connections. The serve task is detached
/// and lives for the remainder of the test process.
pub async fn spawn(server: Arc<WebSocketMessageServer>) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    drop(listener);

    let addr_string = addr.to_string();
    tokio::spawn(async move {
        let _ = server.serve(&addr_string).await;
    });

    for _ in 0..200 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return addr;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never became reachable at {addr}");
}

/// Builds a [`WebSocketMessageServer`] bound to `/` with `receive_fn` as its
/// application handler and a short response timeout suited to tests.
pub fn echo_server(receive_fn: ReceiveFn) -> Arc<WebSocketMessageServer> {
    echo_server_with_config(receive_fn, ConnectionConfig::default())
}

/// Like [`echo_server`], but with a caller-supplied `ConnectionConfig`
/// (response timeout still defaults per `Default`, override it in `config`)
/// — for tests that need a non-default signing salt or timeout on the
/// server side of the connection.
pub fn echo_server_with_config(
    receive_fn: ReceiveFn,
    config: ConnectionConfig,
) -> Arc<WebSocketMessageServer> {
    Arc::new(WebSocketMessageServer::new(vec!["/".to_owned()], config, receive_fn))
}
