// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

use super::*;
use crate::connection::{handler, HandlerResponse};

async fn spawn(paths: Vec<&str>) -> (std::net::SocketAddr, WebSocketMessageServer) {
    let server = WebSocketMessageServer::new(
        paths.into_iter().map(str::to_owned).collect(),
        ConnectionConfig::default(),
        handler(|payload: serde_json::Value| async move { Ok(HandlerResponse::One(payload)) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let router = server.router();
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await;
    });
    (addr, server)
}

#[tokio::test]
async fn accepts_an_allow_listed_path_and_echoes_a_request() {
    let (addr, server) = spawn(vec!["/ws"]).await;
    let url = format!("ws://{addr}/ws");
    let (mut client, _resp) = tokio_tungstenite::connect_async(&url).await.expect("connect");

    for _ in 0..100 {
        if server.connection_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.connection_count().await, 1);

    let request = crate::message::Message::request(1, "client".to_owned(), json!("ping"));
    let text = serde_json::to_string(&request).unwrap();
    client.send(TungsteniteMessage::Text(text.into())).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("ws error");
    let TungsteniteMessage::Text(text) = frame else { panic!("expected a text frame") };
    let reply: crate::message::Message = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(reply.p, json!("ping"));
}

#[tokio::test]
async fn rejects_a_path_outside_the_allow_list() {
    let (addr, _server) = spawn(vec!["/ws"]).await;
    let url = format!("ws://{addr}/not-allowed");
    let (mut client, _resp) = tokio_tungstenite::connect_async(&url).await.expect("connect");

    let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("ws error");
    match frame {
        TungsteniteMessage::Close(Some(close)) => {
            assert_eq!(u16::from(close.code), 1008);
            assert!(close.reason.contains("not-allowed"));
        }
        other => panic!("expected a close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn close_tears_down_every_registered_connection() {
    let (addr, server) = spawn(vec!["/"]).await;
    let url = format!("ws://{addr}/");
    let (mut client, _resp) = tokio_tungstenite::connect_async(&url).await.expect("connect");

    for _ in 0..100 {
        if server.connection_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    server.close().await;
    assert_eq!(server.connection_count().await, 0);

    let frame = tokio::time::timeout(Duration::from_secs(2), client.next()).await.expect("timed out");
    match frame {
        Some(Ok(TungsteniteMessage::Close(_))) | None => {}
        other => panic!("expected a close frame or stream end, got {other:?}"),
    }
}
