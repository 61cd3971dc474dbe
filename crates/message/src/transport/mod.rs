// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport contract shared by every substrate a
//! [`crate::connection::MessageConnection`] can ride on. A transport moves
//! complete, already-reassembled [`Message`]s; it never interprets `t`, `c`,
//! `s`, `p`, or `z`.

pub mod pubsub;
pub mod pubsub_chunk;
pub mod ws_client;
pub mod ws_server;

use async_trait::async_trait;

use crate::error::MessageError;
use crate::message::Message;

/// The single ingress callback a transport invokes once per inbound message.
pub type ReceiveHandler = Box<dyn Fn(Message) + Send + Sync>;

/// A substrate capable of moving [`Message`]s to and from a single peer (or,
/// for the pub/sub transport, a shared subject space).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hands `message` to the underlying substrate. Completes once accepted,
    /// not once the peer has acknowledged it.
    async fn send(&self, message: Message) -> Result<(), MessageError>;

    /// Installs the single ingress handler. Replaces any previous handler.
    /// Transports that can receive before this is called (e.g. a pub/sub
    /// subscription opened at construction) must buffer nothing — the
    /// handler is always installed before traffic flows.
    fn on_receive(&self, handler: ReceiveHandler);

    /// Releases resources. Idempotent — calling it twice is a no-op.
    async fn close(&self);
}
