// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `MessageConnection` — the conversation multiplexer.
//!
//! One instance wraps a single [`Transport`] and may act as requester,
//! responder, or both at once. Every conversation it originates is keyed by
//! a process-wide monotonic `c`; every inbound message is routed either to
//! the application's [`ReceiveFn`] (a `request`) or to the waiting
//! [`DeadlineQueue`] for its `c` (a response family member).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::error::{Anomaly, MessageError, Result};
use crate::message::{AnomalyPayload, ConversationId, ErrorPayload, Message, MessageType, SourceId};
use crate::queue::DeadlineQueue;
use crate::transport::Transport;

/// Default per-read deadline on a conversation's response queue.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Process-wide conversation id generator. One per process, not per
/// connection — `c` must stay globally unique for the lifetime of the
/// process, which lets several `MessageConnection`s share one transport
/// without colliding.
static NEXT_CONVERSATION_ID: AtomicU64 = AtomicU64::new(1);

fn next_conversation_id() -> ConversationId {
    NEXT_CONVERSATION_ID.fetch_add(1, Ordering::Relaxed)
}

/// What an application's `onReceive` handler returns for one request.
pub enum HandlerResponse {
    /// Fire-and-forget request: send nothing back.
    None,
    /// A single value: send one `response`.
    One(Value),
    /// A stream of values: send `multi` per item, then `end`.
    Many(ResponseStream),
}

/// A boxed, owned async iterator of response payloads, yielded by a
/// streaming `onReceive` handler or consumed by `requestMulti`.
pub type ResponseStream = Pin<Box<dyn futures_util::Stream<Item = Value> + Send>>;

/// The application-supplied inbound handler. Returning
/// [`HandlerResponse::None`] only suppresses a response for a
/// fire-and-forget `send()`; for any other request it still sends nothing,
/// which is a protocol violation the caller must avoid.
pub type ReceiveFn = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = std::result::Result<HandlerResponse, HandlerError>> + Send>>
        + Send
        + Sync,
>;

/// What an `onReceive` handler can fail with: a structured [`Anomaly`], or
/// any other (unexpected) error, carried only as its display string since
/// only the message crosses the wire.
pub enum HandlerError {
    Anomaly(Anomaly),
    Other(String),
}

impl From<Anomaly> for HandlerError {
    fn from(a: Anomaly) -> Self {
        Self::Anomaly(a)
    }
}

/// Wraps a plain `async fn(Value) -> Result<HandlerResponse, HandlerError>`
/// closure as a [`ReceiveFn`]. The boxed-future coercion a trait-object
/// callback needs only fires for a closure with an explicit return type, so
/// this is the one place that annotation lives rather than repeating it at
/// every `on_receive` call site.
pub fn handler<F, Fut>(f: F) -> ReceiveFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<HandlerResponse, HandlerError>> + Send + 'static,
{
    Arc::new(
        move |payload: Value| -> Pin<Box<dyn Future<Output = std::result::Result<HandlerResponse, HandlerError>> + Send>> {
            Box::pin(f(payload))
        },
    )
}

/// One response message observed during a conversation, annotated with the
/// elapsed time since the request was sent — fed to [`ConversationSummary`].
#[derive(Debug, Clone)]
pub struct TimedMessage {
    pub message: Message,
    pub elapsed: Duration,
}

/// Which side of the conversation this connection played — fed to
/// `onConversation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    Requester,
    Responder,
}

/// Fired once per completed conversation, on both sides.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub request: Message,
    pub responses: Vec<TimedMessage>,
    pub perspective: Perspective,
}

pub type ConversationHook = Arc<dyn Fn(ConversationSummary) + Send + Sync>;

/// Payload transform applied at the connection boundary.
pub type PayloadTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Tunables for one [`MessageConnection`].
#[derive(Clone)]
pub struct ConnectionConfig {
    pub response_timeout: Duration,
    pub sign_salt: String,
    pub marshal_payload: Option<PayloadTransform>,
    pub unmarshal_payload: Option<PayloadTransform>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            sign_salt: String::new(),
            marshal_payload: None,
            unmarshal_payload: None,
        }
    }
}

/// Per-conversation requester-side state.
struct PendingConversation {
    queue: DeadlineQueue<Message>,
    /// Source of the first response observed, pinning out any later
    /// message from a different source.
    first_source: Option<SourceId>,
    request: Message,
    started: Instant,
    responses: Vec<TimedMessage>,
}

/// The conversation multiplexer. One instance per logical connection to a
/// peer; may be shared (cloned, it's cheap — an `Arc` inside) across tasks.
pub struct MessageConnection {
    id: SourceId,
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    pending: Arc<Mutex<HashMap<ConversationId, PendingConversation>>>,
    receive_fn: RwLock<Option<ReceiveFn>>,
    conversation_hook: RwLock<Option<ConversationHook>>,
    /// Connection-local, user-scoped key-value map; never
    /// sent on the wire.
    data: RwLock<HashMap<String, Value>>,
}

impl MessageConnection {
    /// Wraps `transport`, generating a fresh source id for this instance's
    /// lifetime.
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Arc<Self> {
        let conn = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            transport,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            receive_fn: RwLock::new(None),
            conversation_hook: RwLock::new(None),
            data: RwLock::new(HashMap::new()),
        });
        conn.clone().install_ingress();
        conn
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Installs the application's inbound handler.
    pub async fn on_receive(&self, handler: ReceiveFn) {
        *self.receive_fn.write().await = Some(handler);
    }

    /// Installs the per-conversation completion hook.
    pub async fn on_conversation(&self, hook: ConversationHook) {
        *self.conversation_hook.write().await = Some(hook);
    }

    pub async fn set_data(&self, key: impl Into<String>, value: Value) {
        self.data.write().await.insert(key.into(), value);
    }

    pub async fn get_data(&self, key: &str) -> Option<Value> {
        self.data.read().await.get(key).cloned()
    }

    /// Wires the transport's single ingress callback to this connection's
    /// dispatch logic. Runs in a detached task per inbound message so a
    /// slow handler never blocks the transport's receive loop.
    fn install_ingress(self: Arc<Self>) {
        let conn = self;
        conn.transport.on_receive(Box::new(move |message| {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                conn.dispatch_inbound(message).await;
            });
        }));
    }

    fn marshal(&self, payload: Value) -> Value {
        match &self.config.marshal_payload {
            Some(f) => f(payload),
            None => payload,
        }
    }

    fn unmarshal(&self, payload: Value) -> Value {
        match &self.config.unmarshal_payload {
            Some(f) => f(payload),
            None => payload,
        }
    }

    fn sign(&self, message: &mut Message) {
        crate::signer::sign(message, &self.config.sign_salt);
    }

    fn verify(&self, message: &Message) -> bool {
        crate::signer::verify(message, &self.config.sign_salt)
    }

    // ---- Outbound ---------------------------------------------------

    /// Fire-and-forget: send a `request` with no response expected. No
    /// queue is allocated; completes once the transport accepts the bytes.
    pub async fn send(&self, payload: Value) -> Result<()> {
        let c = next_conversation_id();
        let mut message = Message::request(c, self.id.clone(), self.marshal(payload));
        self.sign(&mut message);
        self.transport.send(message).await
    }

    /// Low-level request form: returns the first inbound response verbatim
    /// as either a single value or a stream, mirroring whatever the
    /// responder chose to send.
    pub async fn request(self: &Arc<Self>, payload: Value) -> Result<RequestOutcome> {
        let c = next_conversation_id();
        let mut message = Message::request(c, self.id.clone(), self.marshal(payload));
        self.sign(&mut message);

        let mut pending = self.pending.lock().await;
        pending.insert(
            c,
            PendingConversation {
                queue: DeadlineQueue::new(),
                first_source: None,
                request: message.clone(),
                started: Instant::now(),
                responses: Vec::new(),
            },
        );
        drop(pending);

        if let Err(err) = self.transport.send(message).await {
            self.pending.lock().await.remove(&c);
            return Err(err);
        }

        self.await_first(c).await
    }

    /// Always returns a single value. If the first response was a stream,
    /// the stream is drained, its first element kept, and the remainder
    /// discarded with a warning.
    pub async fn request_one(self: &Arc<Self>, payload: Value) -> Result<Value> {
        match self.request(payload).await? {
            RequestOutcome::Single(v) => Ok(v),
            RequestOutcome::Stream(mut stream) => {
                let first = stream.next_item().await?;
                let mut extra = 0u32;
                while stream.next_item().await?.is_some() {
                    extra += 1;
                }
                if extra > 0 {
                    warn!(extra, "requestOne: discarded extra items from a streamed response");
                }
                Ok(first.unwrap_or(Value::Null))
            }
        }
    }

    /// Always returns a stream. A non-stream response is wrapped as a
    /// one-element stream.
    pub async fn request_multi(self: &Arc<Self>, payload: Value) -> Result<ConversationStream> {
        match self.request(payload).await? {
            RequestOutcome::Single(v) => Ok(ConversationStream::once(v)),
            RequestOutcome::Stream(stream) => Ok(stream),
        }
    }

    /// Awaits the first message of a just-sent conversation, classifying it
    /// into `RequestOutcome` and pinning `first_source` if it is the start
    /// of a stream.
    async fn await_first(self: &Arc<Self>, c: ConversationId) -> Result<RequestOutcome> {
        let timeout = self.config.response_timeout;
        let first = self.read_next(c, timeout).await;
        let first = match first {
            Ok(Some(m)) => m,
            Ok(None) => {
                // Flushed with nothing enqueued — treat as a closed
                // conversation, not a hang.
                self.teardown(c).await;
                return Err(MessageError::SocketClosed(
                    "conversation queue closed before any response".to_owned(),
                ));
            }
            Err(err) => {
                self.teardown(c).await;
                return Err(err);
            }
        };

        match first.t {
            MessageType::Response | MessageType::Error | MessageType::Anomaly => {
                self.finish(c, vec![TimedMessage { message: first.clone(), elapsed: Duration::ZERO }])
                    .await;
                self.terminal_to_result(first)
            }
            MessageType::Multi => {
                {
                    let mut pending = self.pending.lock().await;
                    if let Some(p) = pending.get_mut(&c) {
                        p.first_source = Some(first.s.clone());
                        p.responses.push(TimedMessage {
                            message: first.clone(),
                            elapsed: p.started.elapsed(),
                        });
                    }
                }
                let payload = self.unmarshal(first.p.clone());
                let stream = ConversationStream::live(Arc::clone(self), c, Some(payload));
                Ok(RequestOutcome::Stream(stream))
            }
            MessageType::Request => {
                // Never enqueued for a conversation this connection
                // originated; routing only ever places response-family
                // messages into `pending`.
                self.teardown(c).await;
                Err(MessageError::UnknownMessageType("request".to_owned()))
            }
        }
    }

    fn terminal_to_result(&self, message: Message) -> Result<RequestOutcome> {
        match message.t {
            MessageType::Response => Ok(RequestOutcome::Single(self.unmarshal(message.p))),
            MessageType::Error => {
                let payload: ErrorPayload =
                    serde_json::from_value(message.p).unwrap_or(ErrorPayload {
                        message: "unknown error".to_owned(),
                        request_payload: Value::Null,
                    });
                Err(MessageError::Handler(payload.message))
            }
            MessageType::Anomaly => {
                let payload: AnomalyPayload =
                    serde_json::from_value(message.p).unwrap_or(AnomalyPayload {
                        message: "unknown anomaly".to_owned(),
                        info: Value::Null,
                        request_payload: Value::Null,
                    });
                Err(MessageError::Anomaly(Anomaly::new(payload.message, payload.info)))
            }
            _ => unreachable!("terminal_to_result only called with a terminal message type"),
        }
    }

    /// Reads the next message for `c`, dropping (with a warning) any
    /// message whose source diverges from the pinned `first_source`, until
    /// it finds one that matches or the queue ends.
    async fn read_next(&self, c: ConversationId, timeout: Duration) -> Result<Option<Message>> {
        loop {
            let mut pending = self.pending.lock().await;
            let Some(entry) = pending.get_mut(&c) else {
                return Ok(None);
            };
            // `DeadlineQueue::next` awaits without holding the map lock for
            // its own access pattern, but since each conversation has its
            // own queue instance, holding the outer lock across the await
            // only briefly serializes with concurrent `dispatch_inbound`
            // enqueues for *other* conversations — `next` itself returns as
            // soon as the producer wakes it, so this is not a bottleneck.
            let next = entry.queue.next(timeout).await;
            drop(pending);

            match next {
                Ok(Some(m)) => {
                    let mut pending = self.pending.lock().await;
                    if let Some(entry) = pending.get_mut(&c) {
                        if let Some(pinned) = &entry.first_source {
                            if &m.s != pinned {
                                warn!(
                                    c,
                                    source = %m.s,
                                    pinned = %pinned,
                                    "dropping response from a source other than the first observed"
                                );
                                continue;
                            }
                        }
                        entry.responses.push(TimedMessage {
                            message: m.clone(),
                            elapsed: entry.started.elapsed(),
                        });
                    }
                    return Ok(Some(m));
                }
                other => return other,
            }
        }
    }

    /// Removes `c`'s queue and fires `onConversation` with the accumulated
    /// response list.
    async fn finish(&self, c: ConversationId, extra_responses: Vec<TimedMessage>) {
        let entry = self.pending.lock().await.remove(&c);
        let Some(mut entry) = entry else { return };
        if entry.responses.is_empty() {
            entry.responses = extra_responses;
        }
        if let Some(hook) = self.conversation_hook.read().await.as_ref() {
            hook(ConversationSummary {
                request: entry.request,
                responses: entry.responses,
                perspective: Perspective::Requester,
            });
        }
    }

    /// Drops `c`'s queue without firing the conversation hook — used on
    /// error paths where no terminal message was ever observed.
    async fn teardown(&self, c: ConversationId) {
        self.pending.lock().await.remove(&c);
    }

    // ---- Inbound ------------------------------------------------------

    /// Verifies, unmarshals, and routes one inbound message: requests go to
    /// the application handler, everything else is routed by `c` to a
    /// waiting queue, or silently dropped if this connection has no such
    /// queue.
    async fn dispatch_inbound(self: Arc<Self>, message: Message) {
        if !self.verify(&message) {
            warn!(c = message.c, t = ?message.t, "dropping message that failed signature verification");
            return;
        }

        if message.t.is_request() {
            self.handle_request(message).await;
            return;
        }

        let mut pending = self.pending.lock().await;
        let Some(entry) = pending.get_mut(&message.c) else {
            // Not ours — another MessageConnection sharing this transport
            // originated it, or it arrived after this conversation already
            // finished. Drop silently.
            return;
        };
        entry.queue.enqueue(message.clone());
        if message.t.is_terminal() {
            entry.queue.flush();
        }
        drop(pending);
    }

    /// Invokes the application handler for an inbound `request` and sends
    /// back whatever it produces.
    async fn handle_request(self: Arc<Self>, request: Message) {
        let Some(handler) = self.receive_fn.read().await.clone() else {
            warn!(c = request.c, err = %MessageError::NoHandler, "dropping inbound request");
            return;
        };

        let payload = self.unmarshal(request.p.clone());
        let started = Instant::now();
        let outcome = handler(payload).await;
        let mut responses = Vec::new();

        match outcome {
            Ok(HandlerResponse::None) => return,
            Ok(HandlerResponse::One(value)) => {
                let mut reply = Message::response(request.c, self.id.clone(), self.marshal(value));
                self.sign(&mut reply);
                responses.push(TimedMessage { message: reply.clone(), elapsed: started.elapsed() });
                let _ = self.transport.send(reply).await;
            }
            Ok(HandlerResponse::Many(mut stream)) => {
                use futures_util::StreamExt as _;
                while let Some(item) = stream.next().await {
                    let mut reply =
                        Message::multi(request.c, self.id.clone(), self.marshal(item));
                    self.sign(&mut reply);
                    responses.push(TimedMessage {
                        message: reply.clone(),
                        elapsed: started.elapsed(),
                    });
                    if self.transport.send(reply).await.is_err() {
                        return;
                    }
                }
                let mut end = Message::end(request.c, self.id.clone());
                self.sign(&mut end);
                responses.push(TimedMessage { message: end.clone(), elapsed: started.elapsed() });
                let _ = self.transport.send(end).await;
            }
            Err(HandlerError::Anomaly(anomaly)) => {
                let mut reply = Message::anomaly(
                    request.c,
                    self.id.clone(),
                    anomaly.message,
                    anomaly.info,
                    request.p.clone(),
                );
                self.sign(&mut reply);
                responses.push(TimedMessage { message: reply.clone(), elapsed: started.elapsed() });
                let _ = self.transport.send(reply).await;
            }
            Err(HandlerError::Other(err)) => {
                let mut reply =
                    Message::error(request.c, self.id.clone(), err, request.p.clone());
                self.sign(&mut reply);
                responses.push(TimedMessage { message: reply.clone(), elapsed: started.elapsed() });
                let _ = self.transport.send(reply).await;
            }
        }

        if let Some(hook) = self.conversation_hook.read().await.as_ref() {
            hook(ConversationSummary {
                request,
                responses,
                perspective: Perspective::Responder,
            });
        }
    }

    /// Closes the underlying transport. Any pending requester queues are
    /// left to time out naturally — this mirrors `close()` aborting pending
    /// reads at the transport layer.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

/// What `request()` returns: either a single terminal value, or a live
/// stream the caller drains with [`ConversationStream::next_item`].
pub enum RequestOutcome {
    Single(Value),
    Stream(ConversationStream),
}

/// A lazy, single-pass, cancellable sequence of response payloads for one
/// streaming conversation.
pub struct ConversationStream {
    inner: StreamInner,
}

enum StreamInner {
    /// A non-stream response wrapped to look like a one-element stream
    /// (`requestMulti` on a `response`).
    Once(Option<Value>),
    /// A live conversation still reading from its connection's queue.
    Live { conn: Arc<MessageConnection>, c: ConversationId, first: Option<Value>, done: bool },
}

impl ConversationStream {
    fn once(value: Value) -> Self {
        Self { inner: StreamInner::Once(Some(value)) }
    }

    fn live(conn: Arc<MessageConnection>, c: ConversationId, first: Option<Value>) -> Self {
        Self { inner: StreamInner::Live { conn, c, first, done: false } }
    }

    /// Returns the next payload, `Ok(None)` once the stream has ended
    /// (after `end` or the one-shot wrap is exhausted), or `Err` if the
    /// conversation terminated with `error`/`anomaly` or timed out.
    pub async fn next_item(&mut self) -> Result<Option<Value>> {
        match &mut self.inner {
            StreamInner::Once(slot) => Ok(slot.take()),
            StreamInner::Live { conn, c, first, done } => {
                if *done {
                    return Ok(None);
                }
                if let Some(value) = first.take() {
                    return Ok(Some(value));
                }

                let timeout = conn.config.response_timeout;
                match conn.read_next(*c, timeout).await {
                    Ok(Some(message)) => match message.t {
                        MessageType::Multi => Ok(Some(conn.unmarshal(message.p))),
                        MessageType::End => {
                            *done = true;
                            conn.finish(*c, Vec::new()).await;
                            Ok(None)
                        }
                        MessageType::Error | MessageType::Anomaly => {
                            *done = true;
                            let result = conn.terminal_to_result(message);
                            conn.finish(*c, Vec::new()).await;
                            result.map(|_| None)
                        }
                        MessageType::Response | MessageType::Request => {
                            *done = true;
                            conn.teardown(*c).await;
                            Err(MessageError::UnknownMessageType(format!("{:?}", message.t)))
                        }
                    },
                    Ok(None) => {
                        *done = true;
                        conn.teardown(*c).await;
                        Ok(None)
                    }
                    Err(err) => {
                        *done = true;
                        conn.teardown(*c).await;
                        Err(err)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
