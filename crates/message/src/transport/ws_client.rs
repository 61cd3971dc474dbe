// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnecting client socket transport — lazily connects on
//! first `send`, reconnects transparently on the next `send` after a drop,
//! and surfaces `SocketClosedError` to any caller mid-close.
//!
//! State machine and backoff shape are grounded in `upstream/bridge.rs`'s
//! `run_loop` (exponential backoff, `tokio_tungstenite::connect_async`,
//! `tokio::select!` over inbound/outbound halves) — see DESIGN.md for the
//! one deliberate divergence from that loop: this transport does not replay
//! in-flight requests across a reconnect, since a dropped conversation here
//! just times out and the caller decides whether to retry.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tracing::{debug, warn};

use super::{ReceiveHandler, Transport};
use crate::error::MessageError;
use crate::message::Message;

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_OPEN: u8 = 2;
const STATE_CLOSING: u8 = 3;

/// Reconnecting client-side [`Transport`] over a single WebSocket URL.
///
/// The socket is not opened until the first `send`. `self_ref` is a `Weak` handle to this same allocation, set up by
/// [`ClientSocketTransport::new`] via `Arc::new_cyclic` — the one connect
/// task spawned per connection attempt needs an owning `Arc<Self>`, and
/// `Transport::send`/`close` only ever receive `&self`.
pub struct ClientSocketTransport {
    url: String,
    self_ref: Weak<ClientSocketTransport>,
    state: AtomicU8,
    outbound: RwLock<Option<mpsc::UnboundedSender<TungsteniteMessage>>>,
    handler: RwLock<Option<ReceiveHandler>>,
    /// Woken whenever `state` transitions away from `connecting`, whether
    /// to `open` (success) or back to `disconnected` (failure).
    open_waiters: tokio::sync::Notify,
    open_error: RwLock<Option<String>>,
    close_notify: tokio::sync::Notify,
}

impl ClientSocketTransport {
    /// Records `url` without connecting.
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            url: url.into(),
            self_ref: self_ref.clone(),
            state: AtomicU8::new(STATE_DISCONNECTED),
            outbound: RwLock::new(None),
            handler: RwLock::new(None),
            open_waiters: tokio::sync::Notify::new(),
            open_error: RwLock::new(None),
            close_notify: tokio::sync::Notify::new(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }

    fn this(&self) -> Arc<Self> {
        // `self` is always reached through the `Arc<Self>` the connection
        // holds (as `Arc<dyn Transport>`); the cycle set up in `new` never
        // drops early because that very `Arc` keeps it alive.
        self.self_ref.upgrade().expect("ClientSocketTransport outlived its own Arc")
    }

    /// Ensures a connect attempt is in flight (spawning one if currently
    /// `disconnected`), then awaits either `open` or a surfaced connect
    /// error.
    async fn ensure_connected(&self) -> Result<(), MessageError> {
        loop {
            match self.state.load(Ordering::Acquire) {
                STATE_OPEN => return Ok(()),
                STATE_CLOSING => {
                    self.close_notify.notified().await;
                    return Err(MessageError::SocketClosed(format!("{} is closing", self.url)));
                }
                STATE_DISCONNECTED => {
                    if self
                        .state
                        .compare_exchange(
                            STATE_DISCONNECTED,
                            STATE_CONNECTING,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        tokio::spawn(self.this().run());
                    }
                    self.open_waiters.notified().await;
                }
                STATE_CONNECTING => {
                    self.open_waiters.notified().await;
                }
                _ => unreachable!("invalid client transport state"),
            }

            if self.state.load(Ordering::Acquire) == STATE_OPEN {
                return Ok(());
            }
            if let Some(err) = self.open_error.write().await.take() {
                return Err(MessageError::Connect(err));
            }
        }
    }

    /// Owns one connection attempt and, if it succeeds, the live socket
    /// pump. Returns to `disconnected` once the socket closes, so the next
    /// `send` reconnects transparently.
    async fn run(self: Arc<Self>) {
        match tokio_tungstenite::connect_async(&self.url).await {
            Ok((stream, _response)) => {
                self.state.store(STATE_OPEN, Ordering::Release);
                self.open_waiters.notify_waiters();
                debug!(url = %self.url, "ws_client: connected");
                self.pump(stream).await;
            }
            Err(err) => {
                *self.open_error.write().await =
                    Some(format!("connect to {} failed: {err}", self.url));
                self.state.store(STATE_DISCONNECTED, Ordering::Release);
                self.open_waiters.notify_waiters();
            }
        }
    }

    async fn pump(
        self: Arc<Self>,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        let (mut ws_tx, mut ws_rx) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<TungsteniteMessage>();
        *self.outbound.write().await = Some(outbound_tx);

        loop {
            tokio::select! {
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(frame) => {
                            if ws_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = ws_tx.send(TungsteniteMessage::Close(None)).await;
                            break;
                        }
                    }
                }
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(TungsteniteMessage::Text(text))) => self.deliver(text.as_str()),
                        Some(Ok(TungsteniteMessage::Close(_))) | None => break,
                        Some(Err(err)) => {
                            warn!(url = %self.url, %err, "ws_client: read error, dropping connection");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }

        *self.outbound.write().await = None;
        let was_closing = self.state.swap(STATE_DISCONNECTED, Ordering::AcqRel) == STATE_CLOSING;
        debug!(url = %self.url, "ws_client: connection dropped");
        self.close_notify.notify_waiters();
        let _ = was_closing;
    }

    fn deliver(&self, text: &str) {
        let message: Message = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(err) => {
                warn!(%err, "ws_client: dropping frame that did not decode as a Message");
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
impl Transport for ClientSocketTransport {
    /// `disconnected` initiates a connect, `connecting` awaits the open
    /// event, `open` writes immediately, `closing` awaits close then fails
    /// with `SocketClosedError`.
    async fn send(&self, message: Message) -> Result<(), MessageError> {
        self.ensure_connected().await?;

        let text = serde_json::to_string(&message)
            .map_err(|err| MessageError::Fatal(format!("failed to marshal message: {err}")))?;
        let outbound = self.outbound.read().await;
        match outbound.as_ref() {
            Some(tx) => tx
                .send(TungsteniteMessage::Text(text.into()))
                .map_err(|_| MessageError::SocketClosed(self.url.clone())),
            None => Err(MessageError::SocketClosed(self.url.clone())),
        }
    }

    fn on_receive(&self, handler: ReceiveHandler) {
        if let Ok(mut slot) = self.handler.try_write() {
            *slot = Some(handler);
        }
    }

    /// Closes with status 1000 ("normal"); resolves once the close event
    /// fires, and is a no-op if never connected`).
    async fn close(&self) {
        let prev = self.state.swap(STATE_CLOSING, Ordering::AcqRel);
        if prev == STATE_DISCONNECTED {
            self.state.store(STATE_DISCONNECTED, Ordering::Release);
            return;
        }
        if let Some(tx) = self.outbound.read().await.as_ref() {
            let _ = tx.send(TungsteniteMessage::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "normal".into(),
            })));
        }
        self.close_notify.notified().await;
    }
}

/// Establishes the initial connection eagerly, retrying up to
/// `max_attempts` times (`-1` means forever, mirroring the pub/sub
/// transport's `maxConnectAttempts` knob). Useful for callers (e.g.
/// [`crate::client`]) that want connection failures surfaced immediately
/// rather than on the first lazy `send`.
pub async fn connect_eager(
    transport: &Arc<ClientSocketTransport>,
    max_attempts: i32,
    wait: Duration,
) -> Result<(), MessageError> {
    let mut attempt = 0i32;
    loop {
        attempt += 1;
        match transport.ensure_connected().await {
            Ok(()) => return Ok(()),
            Err(err) => {
                let exhausted = max_attempts >= 0 && attempt >= max_attempts;
                if exhausted {
                    return Err(err);
                }
                warn!(url = %transport.url, attempt, %err, "ws_client: connect failed, retrying");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
#[path = "ws_client_tests.rs"]
mod tests;
