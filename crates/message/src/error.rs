// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the message runtime.
//!
//! `Anomaly` is an expected, structured failure an application handler
//! raises deliberately; everything else a handler throws is serialized as a
//! generic `Error`. The remaining variants are raised locally by the runtime
//! itself and never cross the wire.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An expected, semantic failure raised by an `onReceive` handler.
///
/// Preserves `info` across the wire so the requester can branch on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub message: String,
    #[serde(default)]
    pub info: Value,
}

impl Anomaly {
    pub fn new(message: impl Into<String>, info: Value) -> Self {
        Self { message: message.into(), info }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Anomaly {}

/// Everything that can go wrong in the message runtime.
///
/// Mirrors this workspace's hand-rolled `MuxError` shape rather than reaching
/// for `thiserror`: a plain enum with a `Display` impl and an `as_str` code.
#[derive(Debug, Clone)]
pub enum MessageError {
    /// A handler raised an `Anomaly` — expected, structured failure.
    Anomaly(Anomaly),
    /// A handler raised anything else — unexpected failure. Carries only the
    /// message; the original error type does not cross the wire.
    Handler(String),
    /// Signature verification failed or was required but absent.
    Verification,
    /// A response queue read exceeded `response_timeout`.
    Timeout,
    /// A transport could not reach its peer.
    Connect(String),
    /// The transport closed while a conversation was in flight.
    SocketClosed(String),
    /// A `request` arrived but no `onReceive` handler was installed.
    NoHandler,
    /// An inbound message carried an unrecognized `t`.
    UnknownMessageType(String),
    /// Anything else the runtime cannot proceed from (bad config, a
    /// transport invariant violated, a message too large to chunk).
    Fatal(String),
}

impl MessageError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anomaly(_) => "ANOMALY",
            Self::Handler(_) => "ERROR",
            Self::Verification => "VERIFICATION_ERROR",
            Self::Timeout => "TIMEOUT_ERROR",
            Self::Connect(_) => "CONNECT_ERROR",
            Self::SocketClosed(_) => "SOCKET_CLOSED_ERROR",
            Self::NoHandler => "NO_HANDLER",
            Self::UnknownMessageType(_) => "UNKNOWN_MESSAGE_TYPE",
            Self::Fatal(_) => "FATAL",
        }
    }

    /// True for handler-raised `Anomaly`, false for everything else.
    ///
    /// Applications branch on this the way they'd branch on an exception
    /// subclass in the original implementation.
    pub fn is_anomaly(&self) -> bool {
        matches!(self, Self::Anomaly(_))
    }
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anomaly(a) => write!(f, "{}: {}", self.as_str(), a.message),
            Self::Handler(m) => write!(f, "{}: {m}", self.as_str()),
            Self::Verification => f.write_str("message signature verification failed"),
            Self::Timeout => f.write_str("response timed out"),
            Self::Connect(m) => write!(f, "connect failed: {m}"),
            Self::SocketClosed(m) => write!(f, "socket closed: {m}"),
            Self::NoHandler => f.write_str("no onReceive handler installed"),
            Self::UnknownMessageType(t) => write!(f, "unknown message type: {t}"),
            Self::Fatal(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for MessageError {}

impl From<Anomaly> for MessageError {
    fn from(a: Anomaly) -> Self {
        Self::Anomaly(a)
    }
}

pub type Result<T> = std::result::Result<T, MessageError>;
