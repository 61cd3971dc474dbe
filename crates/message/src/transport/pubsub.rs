// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NATS-backed publish/subscribe transport.
//!
//! Rides on a subject-addressed broker whose datagrams have a fixed maximum
//! payload, discovered from the broker's `INFO` frame at connect time via
//! `async_nats::Client::server_info`. Messages larger than that limit are
//! split with [`super::pubsub_chunk`] and reassembled on ingress.
//!
//! The underlying `async_nats::Client` is deduplicated by a hash of its
//! connect config and reference-counted, mirroring the one-upstream-
//! connection-shared-by-N-consumers pattern this workspace already uses for
//! its proxied upstream connections.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use futures_util::StreamExt;
use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{pubsub_chunk, ReceiveHandler, Transport};
use crate::error::MessageError;
use crate::message::{ConversationId, Message};

/// Upper bound on how many distinct in-flight nonces the chunk reassembly
/// map tracks at once, enforced via an LRU that evicts the oldest
/// incomplete nonce once this capacity is exceeded.
const MAX_PENDING_CHUNK_MESSAGES: usize = 256;

/// How a subscription is declared: a fixed subject, or `{subject, queue
/// group}` for load-balanced consumption.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub subject: String,
    pub queue_group: Option<String>,
}

impl From<&str> for Subscription {
    fn from(subject: &str) -> Self {
        Self { subject: subject.to_owned(), queue_group: None }
    }
}

/// How an outbound message's subject is resolved: fixed, or computed per
/// message.
#[derive(Clone)]
pub enum PublishSubject {
    Fixed(String),
    Resolver(Arc<dyn Fn(&Message) -> Option<String> + Send + Sync>),
}

impl PublishSubject {
    fn resolve(&self, message: &Message) -> Option<String> {
        match self {
            Self::Fixed(subject) => Some(subject.clone()),
            Self::Resolver(f) => f(message),
        }
    }
}

/// Connection parameters for the NATS client pool; hashed to dedupe.
#[derive(Debug, Clone, Hash)]
pub struct NatsConnectConfig {
    pub url: String,
    pub token: Option<String>,
    pub max_connect_attempts: i32,
    pub connect_time_wait_ms: u64,
}

fn config_hash(config: &NatsConnectConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.hash(&mut hasher);
    hasher.finish()
}

/// Pool of shared `async_nats::Client`s keyed by connect-config hash.
static CLIENT_POOL: OnceLock<Mutex<HashMap<u64, Weak<async_nats::Client>>>> = OnceLock::new();

fn client_pool() -> &'static Mutex<HashMap<u64, Weak<async_nats::Client>>> {
    CLIENT_POOL.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Acquires a shared, refcounted `async_nats::Client` for `config`,
/// connecting (with retry) only if no live connection already exists for
/// this exact config.
async fn acquire_client(config: &NatsConnectConfig) -> Result<Arc<async_nats::Client>, MessageError> {
    let key = config_hash(config);
    {
        let pool = client_pool().lock().await;
        if let Some(existing) = pool.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }
    }

    let client = connect_with_retry(config).await?;
    let client = Arc::new(client);

    let mut pool = client_pool().lock().await;
    // Another task may have raced us to connect for the same config; prefer
    // whichever is already registered so we don't leak a duplicate
    // connection that nothing else will ever see.
    if let Some(existing) = pool.get(&key).and_then(Weak::upgrade) {
        return Ok(existing);
    }
    pool.insert(key, Arc::downgrade(&client));
    Ok(client)
}

async fn connect_with_retry(config: &NatsConnectConfig) -> Result<async_nats::Client, MessageError> {
    let mut attempt = 0i32;
    loop {
        attempt += 1;
        let mut opts = async_nats::ConnectOptions::new();
        if let Some(token) = &config.token {
            opts = opts.token(token.clone());
        }
        match opts.connect(&config.url).await {
            Ok(client) => return Ok(client),
            Err(err) => {
                let exhausted = config.max_connect_attempts >= 0 && attempt >= config.max_connect_attempts;
                if exhausted {
                    return Err(MessageError::Connect(format!(
                        "nats connect to {} failed after {attempt} attempt(s): {err}",
                        config.url
                    )));
                }
                warn!(url = %config.url, attempt, %err, "nats connect failed, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(config.connect_time_wait_ms)).await;
            }
        }
    }
}

/// Partial reassembly state for one in-flight chunked message.
struct PendingChunks {
    slots: Vec<Option<Vec<u8>>>,
}

/// Bounded chunk reassembly buffer, LRU-evicted at
/// [`MAX_PENDING_CHUNK_MESSAGES`] so a sender that never completes a
/// multi-chunk message can't grow this buffer without bound. Kept free of
/// any transport/network concern so it can be exercised directly in tests.
struct ChunkReassembler {
    pending: IndexMap<pubsub_chunk::Nonce, PendingChunks>,
}

impl ChunkReassembler {
    fn new() -> Self {
        Self { pending: IndexMap::new() }
    }

    /// Places one chunk into the buffer; returns the concatenated body in
    /// index order once every slot for its nonce is filled.
    fn insert(&mut self, chunk: pubsub_chunk::Chunk) -> Option<Vec<u8>> {
        if !self.pending.contains_key(&chunk.nonce) && self.pending.len() >= MAX_PENDING_CHUNK_MESSAGES {
            if let Some((evicted, _)) = self.pending.shift_remove_index(0) {
                warn!(nonce = ?evicted, "pubsub: evicting stale chunk buffer, too many in flight");
            }
        }

        let entry = self
            .pending
            .entry(chunk.nonce)
            .or_insert_with(|| PendingChunks { slots: vec![None; chunk.total as usize] });
        if chunk.index as usize >= entry.slots.len() {
            return None;
        }
        entry.slots[chunk.index as usize] = Some(chunk.body);

        if entry.slots.iter().all(Option::is_some) {
            let (_, completed) = self.pending.shift_remove_entry(&chunk.nonce).unwrap();
            Some(completed.slots.into_iter().flatten().flatten().collect())
        } else {
            None
        }
    }
}

/// NATS pub/sub [`Transport`] implementation.
pub struct PubSubTransport {
    client: Arc<async_nats::Client>,
    publish_subject: PublishSubject,
    max_payload: usize,
    /// `c -> subject` so a conversation's `end` goes back on the same
    /// subject as its earlier frames.
    reply_subjects: RwLock<HashMap<ConversationId, String>>,
    pending_chunks: Mutex<ChunkReassembler>,
    handler: RwLock<Option<ReceiveHandler>>,
}

impl PubSubTransport {
    /// Connects (retrying per `config`), subscribes to every entry in
    /// `subscriptions`, and returns a ready transport. Fails fatally if the
    /// broker's max payload cannot be discovered.
    pub async fn connect(
        config: NatsConnectConfig,
        subscriptions: Vec<Subscription>,
        publish_subject: PublishSubject,
    ) -> Result<Arc<Self>, MessageError> {
        let client = acquire_client(&config).await?;
        let max_payload = client.server_info().max_payload;
        if max_payload == 0 {
            return Err(MessageError::Fatal(
                "broker did not report a max payload size".to_owned(),
            ));
        }

        let transport = Arc::new(Self {
            client,
            publish_subject,
            max_payload,
            reply_subjects: RwLock::new(HashMap::new()),
            pending_chunks: Mutex::new(ChunkReassembler::new()),
            handler: RwLock::new(None),
        });

        for sub in subscriptions {
            transport.clone().spawn_subscriber(sub).await?;
        }

        Ok(transport)
    }

    async fn spawn_subscriber(self: Arc<Self>, sub: Subscription) -> Result<(), MessageError> {
        let mut subscription = match &sub.queue_group {
            Some(group) => self.client.queue_subscribe(sub.subject.clone(), group.clone()).await,
            None => self.client.subscribe(sub.subject.clone()).await,
        }
        .map_err(|err| MessageError::Connect(format!("subscribe {} failed: {err}", sub.subject)))?;

        let transport = self;
        tokio::spawn(async move {
            while let Some(msg) = subscription.next().await {
                transport.ingest(msg.payload.as_ref()).await;
            }
            debug!(subject = %sub.subject, "pubsub subscription ended");
        });
        Ok(())
    }

    async fn ingest(&self, datagram: &[u8]) {
        let bytes = if pubsub_chunk::is_chunk(datagram) {
            match self.reassemble(datagram).await {
                Some(bytes) => bytes,
                None => return,
            }
        } else {
            datagram.to_vec()
        };

        // Unmarshal mirrors `send`'s marshal: plain UTF-8 JSON. Payload-level
        // date annotation (`codec::annotate`/`deannotate`) is the
        // application's concern when it builds or reads `p`, not the
        // transport's — `Message.p` already carries whatever JSON shape the
        // sender put there, `@@@D`-suffixed strings included.
        let message: Message = match serde_json::from_slice(&bytes) {
            Ok(m) => m,
            Err(err) => {
                warn!(%err, "pubsub: failed to decode marshaled message");
                return;
            }
        };

        if let Some(handler) = self.handler.read().await.as_ref() {
            handler(message);
        }
    }

    /// Places one chunk into the reassembly buffer; returns the
    /// concatenated body once every slot for its nonce is filled.
    async fn reassemble(&self, datagram: &[u8]) -> Option<Vec<u8>> {
        let chunk = pubsub_chunk::parse(datagram)?;
        self.pending_chunks.lock().await.insert(chunk)
    }
}

#[async_trait]
impl Transport for PubSubTransport {
    async fn send(&self, message: Message) -> Result<(), MessageError> {
        let subject = if message.t == crate::message::MessageType::End {
            let mut replies = self.reply_subjects.write().await;
            replies.remove(&message.c)
        } else {
            let subject = self.publish_subject.resolve(&message);
            if let Some(subject) = &subject {
                self.reply_subjects.write().await.insert(message.c, subject.clone());
            }
            subject
        };
        let Some(subject) = subject else {
            return Err(MessageError::Fatal(format!(
                "no resolvable subject for conversation {}",
                message.c
            )));
        };

        let bytes = serde_json::to_vec(&message)
            .map_err(|err| MessageError::Fatal(format!("failed to marshal message: {err}")))?;

        if bytes.len() <= self.max_payload {
            self.client
                .publish(subject, bytes.into())
                .await
                .map_err(|err| MessageError::Fatal(format!("nats publish failed: {err}")))?;
            return Ok(());
        }

        let frames = pubsub_chunk::split(&bytes, self.max_payload)
            .map_err(MessageError::Fatal)?;
        for frame in frames {
            self.client
                .publish(subject.clone(), frame.into())
                .await
                .map_err(|err| MessageError::Fatal(format!("nats publish failed: {err}")))?;
        }
        Ok(())
    }

    fn on_receive(&self, handler: ReceiveHandler) {
        // `try_write` succeeds synchronously; this method is not async in
        // the trait, and installing the handler never contends with the
        // subscriber loop's brief read lock in steady state.
        if let Ok(mut slot) = self.handler.try_write() {
            *slot = Some(handler);
        }
    }

    async fn close(&self) {
        *self.handler.write().await = None;
    }
}

#[cfg(test)]
#[path = "pubsub_tests.rs"]
mod tests;
