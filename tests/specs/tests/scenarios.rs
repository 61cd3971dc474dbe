// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driven over a real WebSocket, server and client both
//! riding on `coop-message`'s public API.

use std::time::Duration;

use coop_message::connection::{handler, ConnectionConfig, HandlerError, HandlerResponse};
use coop_message::error::{Anomaly, MessageError};
use coop_message::WebSocketMessageClient;
use serde_json::json;

/// S1 — echo: requester sends `"hello"`, handler returns `"you said hello"`.
#[tokio::test]
async fn s1_echo_single_response() {
    let server = coop_message_specs::echo_server(handler(|payload: serde_json::Value| async move {
        let text = payload.as_str().unwrap_or_default().to_owned();
        Ok(HandlerResponse::One(json!(format!("you said {text}"))))
    }));
    let addr = coop_message_specs::spawn(server).await;

    let client = WebSocketMessageClient::create(format!("ws://{addr}/"), ConnectionConfig::default()).await;
    let reply = client.connection().request_one(json!("hello")).await.unwrap();
    assert_eq!(reply, json!("you said hello"));
}

/// S2 — multi stream: handler yields three items terminated by `end`.
#[tokio::test]
async fn s2_multi_stream() {
    let server = coop_message_specs::echo_server(handler(|_payload: serde_json::Value| async move {
        let items = vec![json!("who's"), json!("there"), json!("?")];
        let stream = Box::pin(futures_util::stream::iter(items));
        Ok(HandlerResponse::Many(stream))
    }));
    let addr = coop_message_specs::spawn(server).await;

    let client = WebSocketMessageClient::create(format!("ws://{addr}/"), ConnectionConfig::default()).await;
    let mut stream = client.connection().request_multi(json!("knock knock")).await.unwrap();
    let mut collected = Vec::new();
    while let Some(item) = stream.next_item().await.unwrap() {
        collected.push(item);
    }
    assert_eq!(collected, vec![json!("who's"), json!("there"), json!("?")]);
}

/// S3 — anomaly: handler throws a structured anomaly, requester sees `info`
/// preserved across the wire.
#[tokio::test]
async fn s3_anomaly_propagates_with_info() {
    let server = coop_message_specs::echo_server(handler(|_payload: serde_json::Value| async move {
        Err(HandlerError::Anomaly(Anomaly::new("nope", json!({"code": 7}))))
    }));
    let addr = coop_message_specs::spawn(server).await;

    let client = WebSocketMessageClient::create(format!("ws://{addr}/"), ConnectionConfig::default()).await;
    let err = client.connection().request_one(json!("anything")).await.unwrap_err();
    match err {
        MessageError::Anomaly(a) => {
            assert_eq!(a.message, "nope");
            assert_eq!(a.info, json!({"code": 7}));
        }
        other => panic!("expected Anomaly, got {other:?}"),
    }
}

/// S5 — date preservation and signing: a payload mixing a real timestamp and
/// an ISO-looking string is annotated, sent signed over a live connection on
/// both ends, echoed back, and deannotated — the real timestamp comes back
/// as a `Timestamp`, the look-alike string stays a plain `String`.
#[tokio::test]
async fn s5_dates_and_signing_round_trip() {
    use coop_message::codec::{annotate, deannotate, AnnotatedValue};
    use serde_json::Map;

    let sign_salt = "shared-secret".to_owned();
    let server_config = ConnectionConfig { sign_salt: sign_salt.clone(), ..Default::default() };
    let server = coop_message_specs::echo_server_with_config(
        handler(|payload: serde_json::Value| async move { Ok(HandlerResponse::One(payload)) }),
        server_config,
    );
    let addr = coop_message_specs::spawn(server).await;

    let config = ConnectionConfig { sign_salt: sign_salt.clone(), ..Default::default() };
    let client = WebSocketMessageClient::create(format!("ws://{addr}/"), config).await;

    let date = chrono::DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let mut fields = Map::new();
    fields.insert("date".to_owned(), AnnotatedValue::Timestamp(date));
    fields.insert(
        "dateStr".to_owned(),
        AnnotatedValue::String("2024-01-02T03:04:05.000Z".to_owned()),
    );
    let payload = annotate(&AnnotatedValue::Object(fields));

    let reply = client.connection().request_one(payload).await.unwrap();
    let deannotated = deannotate(reply);
    let AnnotatedValue::Object(reply_fields) = deannotated else {
        panic!("expected an object");
    };
    assert!(matches!(reply_fields.get("date"), Some(AnnotatedValue::Timestamp(d)) if *d == date));
    assert!(matches!(
        reply_fields.get("dateStr"),
        Some(AnnotatedValue::String(s)) if s == "2024-01-02T03:04:05.000Z"
    ));
}

/// S6 — timeout: the handler never returns within the configured deadline,
/// so `requestOne` fails with `TimeoutError`.
#[tokio::test]
async fn s6_timeout_tears_down_the_conversation() {
    let server = coop_message_specs::echo_server(handler(|_payload: serde_json::Value| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(HandlerResponse::One(json!("too late")))
    }));
    let addr = coop_message_specs::spawn(server).await;

    let config = ConnectionConfig { response_timeout: Duration::from_millis(50), ..Default::default() };
    let client = WebSocketMessageClient::create(format!("ws://{addr}/"), config).await;

    let err = client.connection().request_one(json!("hello")).await.unwrap_err();
    assert!(matches!(err, MessageError::Timeout));
}
