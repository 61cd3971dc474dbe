// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket message client — a per-URL cached [`MessageConnection`] riding
//! on a reconnecting client socket transport, grounded in the same
//! connection-reuse idiom as the pub/sub transport's shared NATS client
//! pool.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::connection::{ConnectionConfig, MessageConnection};
use crate::transport::ws_client::ClientSocketTransport;
use crate::transport::Transport;

/// Fan-out handler installed via [`WebSocketMessageClient::add_receive_handler`].
/// Every registered handler is awaited in turn for each inbound server-push
/// message; none of them produce a response.
pub type PushHandler = Arc<dyn Fn(Value) -> futures_util::future::BoxFuture<'static, ()> + Send + Sync>;

/// Process-wide cache of client connections, keyed by URL.
static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<WebSocketMessageClient>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, Arc<WebSocketMessageClient>>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// One cached client connection to a single URL.
pub struct WebSocketMessageClient {
    url: String,
    connection: Arc<MessageConnection>,
    handlers: RwLock<Vec<PushHandler>>,
}

impl WebSocketMessageClient {
    /// Returns the cached connection for `url`, creating and registering one
    /// on first use.
    pub async fn create(url: impl Into<String>, config: ConnectionConfig) -> Arc<Self> {
        let url = url.into();
        if let Some(existing) = registry().read().await.get(&url) {
            return Arc::clone(existing);
        }

        let mut registry = registry().write().await;
        if let Some(existing) = registry.get(&url) {
            return Arc::clone(existing);
        }

        let transport: Arc<dyn Transport> = ClientSocketTransport::new(url.clone());
        let connection = MessageConnection::new(transport, config);
        let client = Arc::new(Self { url: url.clone(), connection, handlers: RwLock::new(Vec::new()) });

        let dispatch = Arc::clone(&client);
        client
            .connection
            .on_receive(crate::connection::handler(move |payload: Value| {
                let dispatch = Arc::clone(&dispatch);
                async move {
                    dispatch.dispatch(payload).await;
                    Ok(crate::connection::HandlerResponse::None)
                }
            }))
            .await;

        registry.insert(url, Arc::clone(&client));
        client
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn connection(&self) -> &Arc<MessageConnection> {
        &self.connection
    }

    /// Registers an additional push handler. Order among handlers is
    /// unspecified.
    pub async fn add_receive_handler(&self, handler: PushHandler) {
        self.handlers.write().await.push(handler);
    }

    async fn dispatch(&self, payload: Value) {
        let handlers = self.handlers.read().await.clone();
        for handler in handlers {
            handler(payload.clone()).await;
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
