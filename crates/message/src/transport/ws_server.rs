// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-side socket transport — a thin wrapper over one
//! already-upgraded `axum::extract::ws::WebSocket`, mirroring
//! `handle_ws`'s `socket.split()` + `tokio::select!` shape from this
//! workspace's downstream bridge handler.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use super::{ReceiveHandler, Transport};
use crate::error::MessageError;
use crate::message::Message;

/// Wraps one upgraded WebSocket half as a [`Transport`]. `send` hands
/// frames to an internal queue drained by the connection's background
/// pump task; `close` signals that pump to shut down and waits for it to
/// observe the peer's close frame (or the queue side closing first).
pub struct ServerSocketTransport {
    outbound: mpsc::UnboundedSender<WsMessage>,
    handler: RwLock<Option<ReceiveHandler>>,
    closed: tokio::sync::Notify,
    shutdown: RwLock<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl ServerSocketTransport {
    /// Spawns the per-connection pump task over `socket` and returns the
    /// transport handle the rest of the runtime interacts with.
    pub fn spawn(socket: WebSocket) -> Arc<Self> {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let transport = Arc::new(Self {
            outbound: outbound_tx,
            handler: RwLock::new(None),
            closed: tokio::sync::Notify::new(),
            shutdown: RwLock::new(Some(shutdown_tx)),
        });

        let (mut ws_tx, mut ws_rx) = socket.split();
        let pump = Arc::clone(&transport);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                    outgoing = outbound_rx.recv() => {
                        match outgoing {
                            Some(frame) => {
                                if ws_tx.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                let _ = ws_tx.send(WsMessage::Close(None)).await;
                                break;
                            }
                        }
                    }
                    incoming = ws_rx.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Text(text))) => {
                                pump.deliver(text.as_str());
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Err(err)) => {
                                warn!(%err, "ws_server: read error, closing connection");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            debug!("ws_server: connection pump exiting");
            pump.closed.notify_waiters();
        });

        transport
    }

    /// Resolves once this connection's pump has exited, whether from a
    /// peer-initiated close, a read error, or a prior call to [`Self::close`].
    pub async fn wait_closed(&self) {
        self.closed.notified().await;
    }

    fn deliver(&self, text: &str) {
        let message: Message = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(err) => {
                warn!(%err, "ws_server: dropping frame that did not decode as a Message");
                return;
            }
        };
        if let Ok(handler) = self.handler.try_read() {
            if let Some(handler) = handler.as_ref() {
                handler(message);
            }
        }
    }
}

#[async_trait]
impl Transport for ServerSocketTransport {
    async fn send(&self, message: Message) -> Result<(), MessageError> {
        let text = serde_json::to_string(&message)
            .map_err(|err| MessageError::Fatal(format!("failed to marshal message: {err}")))?;
        self.outbound
            .send(WsMessage::Text(text.into()))
            .map_err(|_| MessageError::SocketClosed("connection pump already exited".to_owned()))
    }

    fn on_receive(&self, handler: ReceiveHandler) {
        if let Ok(mut slot) = self.handler.try_write() {
            *slot = Some(handler);
        }
    }

    async fn close(&self) {
        let notified = self.closed.notified();
        // `shutdown` is `None` after the first call — close() is idempotent,
        // so a second call just waits on the same notification the first
        // close already triggered (or that the peer's own close triggered).
        if let Some(tx) = self.shutdown.write().await.take() {
            let _ = tx.send(());
        }
        notified.await;
    }
}

#[cfg(test)]
#[path = "ws_server_tests.rs"]
mod tests;
