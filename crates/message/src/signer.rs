// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message signing — an HMAC-SHA256 keyed on a shared salt, covering the
//! type, conversation id, source id, canonical payload encoding, and a
//! random per-message nonce. A peer with a salt configured rejects any
//! inbound message that lacks a valid `z`; a peer without one signs
//! nothing and skips verification entirely.

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;

use crate::codec::canonical_json;
use crate::message::Message;

type HmacSha256 = Hmac<Sha256>;

/// Bytes of random nonce folded into the hash and carried in `z`.
const NONCE_LEN: usize = 16;

/// Draws a fresh 128-bit nonce, hex-encoded to 32 chars.
fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Builds the exact byte string that gets HMAC'd: `t`, `c`, `s`, the
/// canonical JSON encoding of `p`, and the nonce, joined by a NUL byte so
/// no field's content can shift a later field's boundary.
fn signing_input(t: &str, c: u64, s: &str, p: &Value, nonce: &str) -> String {
    format!("{t}\u{0}{c}\u{0}{s}\u{0}{}\u{0}{nonce}", canonical_json(p))
}

fn type_str(message: &Message) -> String {
    serde_json::to_value(message.t)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

/// Sign a message in place, setting `z = "<nonce>:<hash>"`. No-op (clears
/// `z`) when `salt` is empty, matching the "signing is opt-in per peer"
/// design.
pub fn sign(message: &mut Message, salt: &str) {
    if salt.is_empty() {
        message.z = None;
        return;
    }
    let nonce = generate_nonce();
    let input = signing_input(&type_str(message), message.c, &message.s, &message.p, &nonce);

    // `Hmac::new_from_slice` only fails for key sizes the block cipher
    // rejects outright, which never happens for a variable-length key.
    let mut mac = match HmacSha256::new_from_slice(salt.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return,
    };
    mac.update(input.as_bytes());
    let hash = hex::encode(mac.finalize().into_bytes());
    message.z = Some(format!("{nonce}:{hash}"));
}

/// Verify a message's `z` against `salt`. `salt` empty means signing is
/// disabled for this peer, so verification always succeeds. Otherwise a
/// missing, malformed, or mismatched `z` is a hard failure — the caller
/// converts this into `MessageError::Verification`.
pub fn verify(message: &Message, salt: &str) -> bool {
    if salt.is_empty() {
        return true;
    }
    let Some(z) = &message.z else { return false };
    let Some((nonce, hash_hex)) = z.split_once(':') else { return false };

    let input = signing_input(&type_str(message), message.c, &message.s, &message.p, nonce);

    // Decode the hash half and compare via `hmac`'s own constant-time
    // `verify_slice` rather than a `==` on hex strings, so comparison
    // timing doesn't leak.
    let Ok(mut mac) = HmacSha256::new_from_slice(salt.as_bytes()) else { return false };
    mac.update(input.as_bytes());
    let Ok(given) = hex::decode(hash_hex) else { return false };
    mac.verify_slice(&given).is_ok()
}

#[cfg(test)]
#[path = "signer_tests.rs"]
mod tests;
