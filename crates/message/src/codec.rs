// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Value annotation codec — dates survive a JSON round trip without
//! hijacking strings that merely look like timestamps.
//!
//! JSON itself cannot distinguish a date from a string that merely looks
//! like one, which is exactly the distinction the original (JS) runtime
//! gets for free from `Date` being a runtime type distinct from `string`.
//! [`AnnotatedValue`] is the Rust stand-in for that distinction: it is a
//! `serde_json::Value`-shaped tree with one extra variant,
//! [`AnnotatedValue::Timestamp`]. Application payloads that carry real dates
//! are built as `AnnotatedValue`s; [`annotate`] folds a tree of those down to
//! a plain `Value` (dates become `"<rfc3339>@@@D"` strings), and
//! [`deannotate`] is its exact inverse.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

/// Suffix appended to an annotated timestamp. Any string ending in this
/// exact suffix deannotates back to a timestamp; nothing else does.
const DATE_SUFFIX: &str = "@@@D";

/// A JSON-shaped value that additionally distinguishes real timestamps from
/// strings that merely look like one.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotatedValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<AnnotatedValue>),
    Object(Map<String, AnnotatedValue>),
}

// `serde_json::Map<String, V>` requires `V` to be usable as a map value;
// it is generic enough to hold `AnnotatedValue` directly.
impl Default for AnnotatedValue {
    fn default() -> Self {
        Self::Null
    }
}

impl From<Value> for AnnotatedValue {
    /// Lossless lift from a plain `Value` — every string stays a string,
    /// since a bare `Value` carries no date information to recover.
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<DateTime<Utc>> for AnnotatedValue {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::Timestamp(dt)
    }
}

/// Fold an [`AnnotatedValue`] tree down to a plain `Value`, turning every
/// [`AnnotatedValue::Timestamp`] into an `"<rfc3339>@@@D"` string.
pub fn annotate(value: &AnnotatedValue) -> Value {
    match value {
        AnnotatedValue::Null => Value::Null,
        AnnotatedValue::Bool(b) => Value::Bool(*b),
        AnnotatedValue::Number(n) => Value::Number(n.clone()),
        AnnotatedValue::String(s) => Value::String(s.clone()),
        AnnotatedValue::Timestamp(dt) => {
            Value::String(format!("{}{DATE_SUFFIX}", dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
        }
        AnnotatedValue::Array(items) => Value::Array(items.iter().map(annotate).collect()),
        AnnotatedValue::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), annotate(v));
            }
            Value::Object(out)
        }
    }
}

/// Reverse [`annotate`]: any string ending in the exact `@@@D` suffix
/// becomes [`AnnotatedValue::Timestamp`]; every other scalar, including
/// strings that merely look like timestamps, stays a plain string.
pub fn deannotate(value: Value) -> AnnotatedValue {
    match value {
        Value::Null => AnnotatedValue::Null,
        Value::Bool(b) => AnnotatedValue::Bool(b),
        Value::Number(n) => AnnotatedValue::Number(n),
        Value::Array(items) => AnnotatedValue::Array(items.into_iter().map(deannotate).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, deannotate(v));
            }
            AnnotatedValue::Object(out)
        }
        Value::String(s) => match s.strip_suffix(DATE_SUFFIX) {
            Some(iso) => match DateTime::parse_from_rfc3339(iso) {
                Ok(dt) => AnnotatedValue::Timestamp(dt.with_timezone(&Utc)),
                // Malformed date-ish suffix: pass the string through unchanged.
                Err(_) => AnnotatedValue::String(s),
            },
            None => AnnotatedValue::String(s),
        },
    }
}

/// `serialize(v) = jsonEncode(annotate(v))`.
pub fn serialize(value: &AnnotatedValue) -> Result<String, serde_json::Error> {
    serde_json::to_string(&annotate(value))
}

/// `deserialize(s) = deannotate(jsonDecode(s))`.
pub fn deserialize(text: &str) -> Result<AnnotatedValue, serde_json::Error> {
    let raw: Value = serde_json::from_str(text)?;
    Ok(deannotate(raw))
}

/// Canonical encoding used for hashing: object keys sorted via a `BTreeMap`
/// re-serialization. `serde_json`'s default map is insertion ordered (no
/// `preserve_order` feature here), so this is the one place a stable key
/// order is enforced, so the signer hashes the same bytes regardless of the
/// insertion order of the object being signed.
pub fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            Value::Object(map) => {
                let sorted: std::collections::BTreeMap<String, Value> =
                    map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                serde_json::to_value(sorted).unwrap_or(Value::Null)
            }
            other => other.clone(),
        }
    }
    serde_json::to_string(&sort(value)).unwrap_or_default()
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
