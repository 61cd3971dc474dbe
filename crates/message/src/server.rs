// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket message server — owns an axum router, accepts upgrades on an
//! allow-listed set of paths, and wraps each accepted socket in its own
//! [`MessageConnection`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::CloseFrame;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::Uri;
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::connection::{ConnectionConfig, MessageConnection, ReceiveFn};
use crate::transport::ws_server::ServerSocketTransport;

pub type ConnectionId = String;

/// Fired once per accepted connection, after registration.
pub type ConnectHook = Arc<dyn Fn(Arc<MessageConnection>) + Send + Sync>;
/// Fired once per connection teardown, after deregistration.
pub type DisconnectHook = Arc<dyn Fn(ConnectionId) + Send + Sync>;

/// Shared state behind the axum router: the allow-listed paths, the
/// per-connection config template, and the live connection registry
/// (mirrors `MuxState.sessions`).
struct ServerState {
    allowed_paths: Vec<String>,
    connection_config: ConnectionConfig,
    receive_fn: ReceiveFn,
    connections: RwLock<HashMap<ConnectionId, Arc<MessageConnection>>>,
    on_connect: RwLock<Option<ConnectHook>>,
    on_disconnect: RwLock<Option<DisconnectHook>>,
}

/// A running WebSocket message server.
pub struct WebSocketMessageServer {
    state: Arc<ServerState>,
}

impl WebSocketMessageServer {
    /// Builds a server that will accept upgrades on `allowed_paths` (default
    /// `["/"]` if empty) and hand every inbound `request` to `receive_fn`.
    pub fn new(
        allowed_paths: Vec<String>,
        connection_config: ConnectionConfig,
        receive_fn: ReceiveFn,
    ) -> Self {
        let allowed_paths = if allowed_paths.is_empty() { vec!["/".to_owned()] } else { allowed_paths };
        Self {
            state: Arc::new(ServerState {
                allowed_paths,
                connection_config,
                receive_fn,
                connections: RwLock::new(HashMap::new()),
                on_connect: RwLock::new(None),
                on_disconnect: RwLock::new(None),
            }),
        }
    }

    pub async fn on_connect(&self, hook: ConnectHook) {
        *self.state.on_connect.write().await = Some(hook);
    }

    pub async fn on_disconnect(&self, hook: DisconnectHook) {
        *self.state.on_disconnect.write().await = Some(hook);
    }

    pub async fn connection(&self, id: &str) -> Option<Arc<MessageConnection>> {
        self.state.connections.read().await.get(id).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.connections.read().await.len()
    }

    pub(crate) fn router(&self) -> Router {
        Router::new()
            .fallback(any(upgrade))
            .with_state(Arc::clone(&self.state))
    }

    /// Binds `addr` and serves until the process exits or the listener
    /// errors. Callers that want graceful shutdown should wrap this with
    /// their own `tokio::select!` against a cancellation signal.
    pub async fn serve(&self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "message server listening");
        axum::serve(
            listener,
            self.router().into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// Closes every registered connection's transport, then releases the
    /// server's own state. Idempotent.
    pub async fn close(&self) {
        let connections: Vec<_> = self.state.connections.write().await.drain().collect();
        for (_, conn) in connections {
            conn.close().await;
        }
    }
}

async fn upgrade(
    State(state): State<Arc<ServerState>>,
    uri: Uri,
    _connect_info: Option<ConnectInfo<std::net::SocketAddr>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let path = uri.path().to_owned();
    if !state.allowed_paths.iter().any(|p| p == &path) {
        let reason = format!("unsupported path: {path}");
        return ws
            .on_upgrade(move |socket| async move {
                let (mut sink, _stream) = futures_util::StreamExt::split(socket);
                let _ = futures_util::SinkExt::send(
                    &mut sink,
                    axum::extract::ws::Message::Close(Some(CloseFrame {
                        code: 1008,
                        reason: reason.into(),
                    })),
                )
                .await;
            })
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_connection(state, socket)).into_response()
}

async fn handle_connection(state: Arc<ServerState>, socket: axum::extract::ws::WebSocket) {
    let transport = ServerSocketTransport::spawn(socket);
    let conn = MessageConnection::new(
        Arc::clone(&transport) as Arc<dyn crate::transport::Transport>,
        state.connection_config.clone(),
    );
    conn.on_receive(state.receive_fn.clone()).await;

    let id = Uuid::new_v4().to_string();
    state.connections.write().await.insert(id.clone(), Arc::clone(&conn));

    if let Some(hook) = state.on_connect.read().await.as_ref() {
        hook(Arc::clone(&conn));
    }

    transport.wait_closed().await;
    state.connections.write().await.remove(&id);
    if let Some(hook) = state.on_disconnect.read().await.as_ref() {
        hook(id);
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
