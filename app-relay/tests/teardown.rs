/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

mod support;

use app_relay::{Error, NetworkType, ServerError, ServerState};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use support::{init_logging, wait_until, Visor};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_close_closes_every_listener_and_conn() {
    init_logging();
    let visor = Visor::start(&["app", "peer"]).await;
    let app = visor.client("app").await;
    let peer = visor.client("peer").await;

    let peer_listener = peer.listen(NetworkType::Skynet, 7000).await.expect("peer listen");
    let mut listeners = Vec::new();
    for port in [7001, 7002, 7003] {
        listeners.push(app.listen(NetworkType::Skynet, port).await.expect("listen"));
    }
    let conns = vec![
        app.dial(peer_listener.addr()).await.expect("dial"),
        app.dial(peer_listener.addr()).await.expect("dial"),
    ];
    let accepted = vec![
        peer_listener.accept().await.expect("accept"),
        peer_listener.accept().await.expect("accept"),
    ];
    assert_eq!(app.listener_count(), 3);
    assert_eq!(app.conn_count(), 2);

    app.close().await;

    for listener in &listeners {
        assert!(listener.is_closed());
        assert!(!visor
            .network
            .is_bound(NetworkType::Skynet, listener.addr().port));
    }
    for conn in &conns {
        assert!(conn.is_closed());
    }
    assert_eq!(app.listener_count(), 0);
    assert_eq!(app.conn_count(), 0);

    let mut buf = [0u8; 8];
    for conn in &accepted {
        assert_eq!(conn.read(&mut buf).await, Ok(0));
    }

    peer.close().await;
    visor.server.close().await.expect("server close");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_close_of_fresh_conns_never_leaks_entries() {
    init_logging();
    let visor = Visor::start(&["app"]).await;
    let app = Arc::new(visor.client("app").await);
    let listener = app.listen(NetworkType::Skynet, 7100).await.expect("listen");

    let dials = (0..16).map(|_| {
        let app = app.clone();
        let target = listener.addr();
        tokio::spawn(async move {
            let conn = app.dial(target).await.expect("dial");
            let closer = tokio::spawn({
                let conn = conn.clone();
                async move { conn.close().await }
            });
            let (own, other) = tokio::join!(conn.close(), closer);
            own.expect("close");
            other.expect("closer task").expect("concurrent close");
        })
    });
    for dialed in join_all(dials).await {
        dialed.expect("dial task");
    }

    assert_eq!(app.conn_count(), 0);
    app.close().await;
    visor.server.close().await.expect("server close");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_close_races_in_flight_registrations() {
    init_logging();
    let visor = Visor::start(&["app", "peer"]).await;
    let app = Arc::new(visor.client("app").await);
    let peer = Arc::new(visor.client("peer").await);
    let peer_listener = peer.listen(NetworkType::Skynet, 7200).await.expect("peer listen");
    let app_listener = app.listen(NetworkType::Skynet, 7201).await.expect("app listen");

    let accepting = tokio::spawn({
        let listener = app_listener.clone();
        async move {
            while let Ok(conn) = listener.accept().await {
                let _ = conn.close().await;
            }
        }
    });

    let mut tasks = Vec::new();
    for offset in 0..16u16 {
        tasks.push(tokio::spawn({
            let app = app.clone();
            let target = peer_listener.addr();
            async move {
                if let Ok(conn) = app.dial(target).await {
                    let _ = conn.close().await;
                }
            }
        }));
        tasks.push(tokio::spawn({
            let app = app.clone();
            async move {
                if let Ok(listener) = app.listen(NetworkType::Skynet, 7300 + offset).await {
                    let _ = listener.close().await;
                }
            }
        }));
        tasks.push(tokio::spawn({
            let peer = peer.clone();
            let target = app_listener.addr();
            async move {
                if let Ok(conn) = peer.dial(target).await {
                    let _ = conn.close().await;
                }
            }
        }));
    }

    app.close().await;
    for task in join_all(tasks).await {
        task.expect("registration task");
    }
    tokio::time::timeout(Duration::from_secs(2), accepting)
        .await
        .expect("accept loop ends once the listener is closed")
        .expect("accept task");

    assert!(app_listener.is_closed());
    assert_eq!(app_listener.open_conns(), 0);
    assert_eq!(app.listener_count(), 0);
    assert_eq!(app.conn_count(), 0);

    peer.close().await;
    visor.server.close().await.expect("server close");
}

#[tokio::test]
async fn server_close_drains_connected_clients() {
    init_logging();
    let visor = Visor::start(&["app"]).await;
    let app = visor.client("app").await;
    let listener = app.listen(NetworkType::Skynet, 0).await.expect("listen");

    let accepting = tokio::spawn({
        let listener = listener.clone();
        async move { listener.accept().await }
    });
    wait_until(|| visor.server.active_conns() > 1).await;

    tokio::time::timeout(Duration::from_secs(2), visor.server.close())
        .await
        .expect("drain completes")
        .expect("close");

    assert_eq!(visor.server.state(), ServerState::Closed);
    assert!(!visor.sock_file.exists());

    let accepted = tokio::time::timeout(Duration::from_secs(2), accepting)
        .await
        .expect("accept fails once the channel is gone")
        .expect("accept task");
    assert!(matches!(accepted, Err(Error::Channel(_))));
    assert!(matches!(
        app.dial(listener.addr()).await,
        Err(Error::Channel(_))
    ));

    let serving = visor.serving.await.expect("serve task");
    assert!(matches!(serving, Err(ServerError::EndpointClosed)));
}
