// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde_json::json;

use super::*;
use crate::connection::{handler, HandlerResponse};
use crate::server::WebSocketMessageServer;

async fn spawn_echo_server() -> std::net::SocketAddr {
    let server = WebSocketMessageServer::new(
        vec!["/".to_owned()],
        ConnectionConfig::default(),
        handler(|payload: Value| async move { Ok(HandlerResponse::One(payload)) }),
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
    addr
}

#[tokio::test]
async fn create_is_cached_per_url() {
    let addr = spawn_echo_server().await;
    let url = format!("ws://{addr}/");

    let a = WebSocketMessageClient::create(url.clone(), ConnectionConfig::default()).await;
    let b = WebSocketMessageClient::create(url, ConnectionConfig::default()).await;
    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn request_one_round_trips_through_a_real_socket() {
    let addr = spawn_echo_server().await;
    let url = format!("ws://{addr}/");
    let client = WebSocketMessageClient::create(url, ConnectionConfig::default()).await;

    let reply = client.connection().request_one(json!("ping")).await.unwrap();
    assert_eq!(reply, json!("ping"));
}

#[tokio::test]
async fn add_receive_handler_fans_out_server_pushes() {
    let addr = spawn_echo_server().await;
    let url = format!("ws://{addr}/");
    let client = WebSocketMessageClient::create(url, ConnectionConfig::default()).await;

    let (tx1, mut rx1) = tokio::sync::mpsc::unbounded_channel();
    let (tx2, mut rx2) = tokio::sync::mpsc::unbounded_channel();
    client
        .add_receive_handler(Arc::new(move |v: Value| {
            let tx1 = tx1.clone();
            Box::pin(async move {
                let _ = tx1.send(v);
            })
        }))
        .await;
    client
        .add_receive_handler(Arc::new(move |v: Value| {
            let tx2 = tx2.clone();
            Box::pin(async move {
                let _ = tx2.send(v);
            })
        }))
        .await;

    client.connection().send(json!("push")).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), rx1.recv()).await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), rx2.recv()).await.unwrap();
    assert_eq!(first, Some(json!("push")));
    assert_eq!(second, Some(json!("push")));
}
