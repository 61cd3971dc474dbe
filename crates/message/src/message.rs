// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire message types — the single record every transport carries.
//!
//! Field keys are kept short (`t`, `c`, `s`, `p`, `z`) to minimize wire
//! bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conversation number. Strictly increasing per process, never reused.
pub type ConversationId = u64;

/// Per-`MessageConnection` source identifier (UUID string).
pub type SourceId = String;

/// `p = "END"` on every stream terminator, so the payload hashes stably
/// under signing regardless of what value ended the stream.
pub const END_PAYLOAD: &str = "END";

/// The single wire record carried by every transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub t: MessageType,
    pub c: ConversationId,
    pub s: SourceId,
    pub p: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub z: Option<String>,
}

/// Message type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Multi,
    End,
    Error,
    Anomaly,
}

impl MessageType {
    /// Terminal response types: the conversation queue is destroyed after one
    /// of these is observed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Response | Self::Error | Self::Anomaly | Self::End)
    }

    pub fn is_request(self) -> bool {
        matches!(self, Self::Request)
    }
}

/// Payload shape for an `error` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(rename = "requestPayload")]
    pub request_payload: Value,
}

/// Payload shape for an `anomaly` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyPayload {
    pub message: String,
    pub info: Value,
    #[serde(rename = "requestPayload")]
    pub request_payload: Value,
}

impl Message {
    pub fn request(c: ConversationId, s: SourceId, p: Value) -> Self {
        Self { t: MessageType::Request, c, s, p, z: None }
    }

    pub fn response(c: ConversationId, s: SourceId, p: Value) -> Self {
        Self { t: MessageType::Response, c, s, p, z: None }
    }

    pub fn multi(c: ConversationId, s: SourceId, p: Value) -> Self {
        Self { t: MessageType::Multi, c, s, p, z: None }
    }

    pub fn end(c: ConversationId, s: SourceId) -> Self {
        Self { t: MessageType::End, c, s, p: Value::String(END_PAYLOAD.to_owned()), z: None }
    }

    pub fn error(c: ConversationId, s: SourceId, message: String, request_payload: Value) -> Self {
        let p = serde_json::to_value(ErrorPayload { message, request_payload })
            .unwrap_or(Value::Null);
        Self { t: MessageType::Error, c, s, p, z: None }
    }

    pub fn anomaly(
        c: ConversationId,
        s: SourceId,
        message: String,
        info: Value,
        request_payload: Value,
    ) -> Self {
        let p = serde_json::to_value(AnomalyPayload { message, info, request_payload })
            .unwrap_or(Value::Null);
        Self { t: MessageType::Anomaly, c, s, p, z: None }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
