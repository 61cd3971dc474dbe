// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test-only infrastructure: an in-process loopback [`Transport`] pair.
//!
//! This in-process "direct" transport has no production use — it exists so
//! [`crate::connection::MessageConnection`]'s conversation logic can be
//! exercised without a real socket or NATS server. Visible only under
//! `#[cfg(test)]`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::error::MessageError;
use crate::message::Message;
use crate::transport::{ReceiveHandler, Transport};

/// One end of an in-process duplex pair. `send` on one end delivers
/// directly to the peer's receive handler.
pub struct LoopbackTransport {
    outbound: mpsc::UnboundedSender<Message>,
    handler: RwLock<Option<ReceiveHandler>>,
}

/// Builds a connected pair of [`LoopbackTransport`]s, wiring each side's
/// outbound channel to the other's ingress handler via a pump task.
pub fn pair() -> (Arc<LoopbackTransport>, Arc<LoopbackTransport>) {
    let (a_tx, mut a_rx) = mpsc::unbounded_channel::<Message>();
    let (b_tx, mut b_rx) = mpsc::unbounded_channel::<Message>();

    let a = Arc::new(LoopbackTransport { outbound: a_tx, handler: RwLock::new(None) });
    let b = Arc::new(LoopbackTransport { outbound: b_tx, handler: RwLock::new(None) });

    let b_for_pump = Arc::clone(&b);
    tokio::spawn(async move {
        while let Some(message) = a_rx.recv().await {
            if let Some(handler) = b_for_pump.handler.read().await.as_ref() {
                handler(message);
            }
        }
    });
    let a_for_pump = Arc::clone(&a);
    tokio::spawn(async move {
        while let Some(message) = b_rx.recv().await {
            if let Some(handler) = a_for_pump.handler.read().await.as_ref() {
                handler(message);
            }
        }
    });

    (a, b)
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, message: Message) -> Result<(), MessageError> {
        self.outbound
            .send(message)
            .map_err(|_| MessageError::SocketClosed("loopback peer dropped".to_owned()))
    }

    fn on_receive(&self, handler: ReceiveHandler) {
        if let Ok(mut slot) = self.handler.try_write() {
            *slot = Some(handler);
        }
    }

    async fn close(&self) {
        *self.handler.write().await = None;
    }
}
