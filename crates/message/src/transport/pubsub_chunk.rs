// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chunk framing for the pub/sub transport — splits a marshaled
//! message too large for the broker's `maxPayload` into fixed-header
//! chunks, and reassembles them on ingress.
//!
//! Chunk layout:
//!
//! ```text
//! [ CHUNK_HEADER_PREFIX | nonce(16) | index(1) | total(1) | body... ]
//! ```
//!
//! Every field is fixed-width; there is no implicit padding. `total` is a
//! single byte, so a message can never be split into more than 255 chunks.

use rand::RngCore;

/// Fixed prefix identifying a datagram as a chunk rather than a whole
/// marshaled message.
pub const CHUNK_HEADER_PREFIX: &[u8] = b"@phnq/message/chunk";

/// Bytes of random nonce identifying the chunks of one logical message.
const NONCE_LEN: usize = 16;

/// `CHUNK_HEADER_PREFIX.len() + NONCE_LEN + 1 (index) + 1 (total)`.
const HEADER_LEN: usize = CHUNK_HEADER_PREFIX.len() + NONCE_LEN + 2;

pub type Nonce = [u8; NONCE_LEN];

/// A single chunk, decoded from or destined for the wire.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub nonce: Nonce,
    pub index: u8,
    pub total: u8,
    pub body: Vec<u8>,
}

/// Splits `payload` into chunks no larger than `max_payload` bytes apiece
/// (header included). Returns `Err` if the payload would need more than 255
/// chunks — the sender must refuse before publishing the first one.
pub fn split(payload: &[u8], max_payload: usize) -> Result<Vec<Vec<u8>>, String> {
    let body_cap = max_payload.saturating_sub(HEADER_LEN);
    if body_cap == 0 {
        return Err(format!(
            "max_payload {max_payload} too small to fit a {HEADER_LEN}-byte chunk header"
        ));
    }

    let num_chunks = payload.len().div_ceil(body_cap).max(1);
    if num_chunks > 255 {
        return Err(format!(
            "message requires {num_chunks} chunks, exceeding the 255-chunk limit"
        ));
    }

    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);

    let total = num_chunks as u8;
    let mut chunks = Vec::with_capacity(num_chunks);
    for (index, body) in payload.chunks(body_cap).enumerate() {
        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(CHUNK_HEADER_PREFIX);
        frame.extend_from_slice(&nonce);
        frame.push(index as u8);
        frame.push(total);
        frame.extend_from_slice(body);
        chunks.push(frame);
    }
    Ok(chunks)
}

/// True if `datagram` begins with [`CHUNK_HEADER_PREFIX`] — i.e. it is a
/// chunk rather than a whole marshaled message.
pub fn is_chunk(datagram: &[u8]) -> bool {
    datagram.starts_with(CHUNK_HEADER_PREFIX)
}

/// Parses one chunk's header and body. `None` on a truncated or malformed
/// datagram — the caller logs and drops it rather than treating it as
/// fatal, since a single bad chunk from the broker should not bring down
/// the transport.
pub fn parse(datagram: &[u8]) -> Option<Chunk> {
    if datagram.len() < HEADER_LEN || !is_chunk(datagram) {
        return None;
    }
    let mut nonce = [0u8; NONCE_LEN];
    let nonce_start = CHUNK_HEADER_PREFIX.len();
    nonce.copy_from_slice(&datagram[nonce_start..nonce_start + NONCE_LEN]);
    let index = datagram[nonce_start + NONCE_LEN];
    let total = datagram[nonce_start + NONCE_LEN + 1];
    if total == 0 || index >= total {
        return None;
    }
    let body = datagram[HEADER_LEN..].to_vec();
    Some(Chunk { nonce, index, total, body })
}

#[cfg(test)]
#[path = "pubsub_chunk_tests.rs"]
mod tests;
