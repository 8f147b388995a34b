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

//! Serving routine for one accepted control connection.

use crate::appnet::AppKey;
use crate::gateway::{dispatch, Gateway};
use crate::observability::{events, fields};
use crate::protocol::{read_frame, write_frame, Request, Response, RpcError};
use crate::signal::{wait_until_set, WaitGroup, WaitGuard};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

const COMPONENT: &str = "server_conn";

pub(crate) type Gateways = Arc<RwLock<HashMap<AppKey, Arc<dyn Gateway>>>>;

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

pub(crate) struct ServedConn {
    pub(crate) id: u64,
    pub(crate) stream: UnixStream,
    pub(crate) gateways: Gateways,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) requests: WaitGroup,
}

/// Reads requests until the peer leaves, the stream fails or shutdown is raised.
///
/// Every request runs in its own task so a pending `Accept` does not hold up other
/// calls on the same connection. Those tasks end together with the connection.
pub(crate) async fn serve(conn: ServedConn, _drained: WaitGuard) {
    let ServedConn {
        id,
        stream,
        gateways,
        mut shutdown,
        requests,
    } = conn;
    let (mut reader, writer) = stream.into_split();
    let writer: SharedWriter = Arc::new(Mutex::new(writer));
    let (conn_done, _) = watch::channel(false);

    let reason = loop {
        let frame = tokio::select! {
            biased;
            _ = wait_until_set(&mut shutdown) => break fields::REASON_SHUTDOWN,
            frame = read_frame::<_, Request>(&mut reader) => frame,
        };

        match frame {
            Ok(Some(request)) => {
                let guard = requests.add();
                tokio::spawn(handle_request(
                    id,
                    request,
                    gateways.clone(),
                    writer.clone(),
                    conn_done.subscribe(),
                    guard,
                ));
            }
            Ok(None) => break fields::REASON_PEER_CLOSED,
            Err(err) => {
                warn!(
                    event = events::SERVER_CONN_READ_FAILED,
                    component = COMPONENT,
                    conn = id,
                    err = %err,
                    "unable to read request"
                );
                break "read_failed";
            }
        }
    };

    conn_done.send_replace(true);
    let _ = writer.lock().await.shutdown().await;
    debug!(
        event = events::SERVER_CONN_DRAINED,
        component = COMPONENT,
        conn = id,
        reason,
        "control connection drained"
    );
}

fn gateway_for(gateways: &Gateways, app_key: &AppKey) -> Option<Arc<dyn Gateway>> {
    gateways
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(app_key)
        .cloned()
}

async fn handle_request(
    conn: u64,
    request: Request,
    gateways: Gateways,
    writer: SharedWriter,
    mut conn_done: watch::Receiver<bool>,
    _in_flight: WaitGuard,
) {
    let Request {
        id,
        namespace,
        call,
    } = request;
    let method = fields::method_name(&call);

    let respond = async {
        let result = match gateway_for(&gateways, &namespace) {
            Some(gateway) => {
                debug!(
                    event = events::SERVER_DISPATCH,
                    component = COMPONENT,
                    conn,
                    app_key = %namespace,
                    method,
                    request_id = id,
                    "dispatching"
                );
                dispatch(gateway.as_ref(), call).await
            }
            None => {
                warn!(
                    event = events::SERVER_UNKNOWN_NAMESPACE,
                    component = COMPONENT,
                    conn,
                    app_key = %namespace,
                    method,
                    "no gateway registered"
                );
                Err(RpcError::UnknownNamespace(namespace.to_string()))
            }
        };

        let response = Response { id, result };
        let mut writer = writer.lock().await;
        if let Err(err) = write_frame(&mut *writer, &response).await {
            warn!(
                event = events::SERVER_CONN_WRITE_FAILED,
                component = COMPONENT,
                conn,
                method,
                request_id = id,
                err = %err,
                "unable to write response"
            );
        }
    };

    tokio::select! {
        biased;
        _ = wait_until_set(&mut conn_done) => {}
        _ = respond => {}
    }
}
