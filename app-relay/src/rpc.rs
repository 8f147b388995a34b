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

//! Client side of the control protocol.
//!
//! [`ControlProtocol`] is the seam every virtual socket talks through. [`RpcClient`]
//! implements it over one stream, multiplexing concurrent calls by request id.

use crate::appnet::{Addr, AppKey, Port};
use crate::error::{Error, Result};
use crate::observability::{events, fields};
use crate::protocol::{read_frame, write_frame, Call, Reply, Request, Response, RpcError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const COMPONENT: &str = "rpc_client";

/// Blocking request/response operations relayed to the visor.
///
/// Calls for different handles may be issued concurrently.
#[async_trait]
pub trait ControlProtocol: Send + Sync {
    /// Returns the new connection handle and the local port the visor picked.
    async fn dial(&self, remote: Addr) -> Result<(u16, Port)>;

    /// Returns the listener handle and the port actually bound.
    async fn listen(&self, local: Addr) -> Result<(u16, Port)>;

    /// Resolves once a peer connects, or fails with [`Error::ListenerClosed`].
    async fn accept(&self, lis_id: u16) -> Result<(u16, Addr)>;

    async fn close_listener(&self, lis_id: u16) -> Result<()>;

    async fn close_conn(&self, conn_id: u16) -> Result<()>;

    /// Reads at most `len` bytes; an empty buffer means the peer closed.
    async fn read(&self, conn_id: u16, len: usize) -> Result<Vec<u8>>;

    async fn write(&self, conn_id: u16, data: &[u8]) -> Result<usize>;
}

type Waiter = oneshot::Sender<std::result::Result<Reply, RpcError>>;

#[derive(Default)]
struct PendingCalls {
    closed: Option<String>,
    waiters: HashMap<u64, Waiter>,
}

type SharedPending = Arc<StdMutex<PendingCalls>>;

fn lock_pending(pending: &StdMutex<PendingCalls>) -> std::sync::MutexGuard<'_, PendingCalls> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Control protocol client for one application, bound to one control stream.
pub struct RpcClient {
    app_key: AppKey,
    writer: Mutex<BoxedWriter>,
    pending: SharedPending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl RpcClient {
    /// Connects to the visor's control socket.
    pub async fn connect(app_key: AppKey, sock_file: &Path) -> Result<Self> {
        match UnixStream::connect(sock_file).await {
            Ok(stream) => {
                debug!(
                    event = events::CHANNEL_CONNECT_OK,
                    component = COMPONENT,
                    app_key = app_key.as_str(),
                    sock_file = %sock_file.display(),
                    "connected to app server"
                );
                Ok(Self::new(app_key, stream))
            }
            Err(err) => {
                warn!(
                    event = events::CHANNEL_CONNECT_FAILED,
                    component = COMPONENT,
                    app_key = app_key.as_str(),
                    sock_file = %sock_file.display(),
                    err = %err,
                    "unable to connect to app server"
                );
                Err(Error::channel(
                    &format!("error connecting to the app server {}", sock_file.display()),
                    err,
                ))
            }
        }
    }

    /// Wraps an already established stream. Spawns the response reader on the
    /// current tokio runtime.
    pub fn new<S>(app_key: AppKey, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
        let pending: SharedPending = Arc::new(StdMutex::new(PendingCalls::default()));
        let reader = tokio::spawn(Self::read_responses(
            app_key.clone(),
            reader,
            pending.clone(),
        ));

        Self {
            app_key,
            writer: Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            reader,
        }
    }

    pub fn app_key(&self) -> &AppKey {
        &self.app_key
    }

    async fn read_responses<R>(app_key: AppKey, mut reader: R, pending: SharedPending)
    where
        R: AsyncRead + Unpin,
    {
        let reason = loop {
            match read_frame::<_, Response>(&mut reader).await {
                Ok(Some(response)) => {
                    let waiter = lock_pending(&pending).waiters.remove(&response.id);
                    match waiter {
                        Some(waiter) => {
                            let _ = waiter.send(response.result);
                        }
                        None => warn!(
                            event = events::CHANNEL_UNMATCHED_RESPONSE,
                            component = COMPONENT,
                            app_key = app_key.as_str(),
                            request_id = response.id,
                            "response for unknown request"
                        ),
                    }
                }
                Ok(None) => break "control channel closed by visor".to_string(),
                Err(err) => {
                    warn!(
                        event = events::CHANNEL_READ_FAILED,
                        component = COMPONENT,
                        app_key = app_key.as_str(),
                        err = %err,
                        "unable to read from control channel"
                    );
                    break format!("control channel read failed: {err}");
                }
            }
        };

        debug!(
            event = events::CHANNEL_CLOSED,
            component = COMPONENT,
            app_key = app_key.as_str(),
            reason = reason.as_str(),
            "failing pending calls"
        );
        let mut pending = lock_pending(&pending);
        pending.closed = Some(reason);
        // dropping the waiters fails every outstanding call
        pending.waiters.clear();
    }

    async fn call(&self, call: Call) -> Result<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = fields::method_name(&call);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = lock_pending(&self.pending);
            if let Some(reason) = &pending.closed {
                return Err(Error::Channel(reason.clone()));
            }
            pending.waiters.insert(id, tx);
        }

        let request = Request {
            id,
            namespace: self.app_key.clone(),
            call,
        };
        let written = {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &request).await
        };
        if let Err(err) = written {
            lock_pending(&self.pending).waiters.remove(&id);
            return Err(Error::channel(&format!("unable to send {method}"), err));
        }

        match rx.await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => {
                let reason = lock_pending(&self.pending)
                    .closed
                    .clone()
                    .unwrap_or_else(|| "control channel closed".to_string());
                Err(Error::Channel(reason))
            }
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn unexpected(method: &str, reply: Reply) -> Error {
    Error::Channel(format!("unexpected reply to {method}: {reply:?}"))
}

#[async_trait]
impl ControlProtocol for RpcClient {
    async fn dial(&self, remote: Addr) -> Result<(u16, Port)> {
        match self.call(Call::Dial { remote }).await? {
            Reply::Dial {
                conn_id,
                local_port,
            } => Ok((conn_id, local_port)),
            other => Err(unexpected("Dial", other)),
        }
    }

    async fn listen(&self, local: Addr) -> Result<(u16, Port)> {
        match self.call(Call::Listen { local }).await? {
            Reply::Listen { lis_id, port } => Ok((lis_id, port)),
            other => Err(unexpected("Listen", other)),
        }
    }

    async fn accept(&self, lis_id: u16) -> Result<(u16, Addr)> {
        match self.call(Call::Accept { lis_id }).await? {
            Reply::Accept { conn_id, remote } => Ok((conn_id, remote)),
            other => Err(unexpected("Accept", other)),
        }
    }

    async fn close_listener(&self, lis_id: u16) -> Result<()> {
        match self.call(Call::CloseListener { lis_id }).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected("CloseListener", other)),
        }
    }

    async fn close_conn(&self, conn_id: u16) -> Result<()> {
        match self.call(Call::CloseConn { conn_id }).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected("CloseConn", other)),
        }
    }

    async fn read(&self, conn_id: u16, len: usize) -> Result<Vec<u8>> {
        match self.call(Call::Read { conn_id, len }).await? {
            Reply::Read { data } => Ok(data),
            other => Err(unexpected("Read", other)),
        }
    }

    async fn write(&self, conn_id: u16, data: &[u8]) -> Result<usize> {
        let call = Call::Write {
            conn_id,
            data: data.to_vec(),
        };
        match self.call(call).await? {
            Reply::Write { written } => Ok(written),
            other => Err(unexpected("Write", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlProtocol, RpcClient};
    use crate::appnet::{Addr, AppKey, NetworkType, PubKey};
    use crate::error::Error;
    use crate::protocol::{read_frame, write_frame, Call, Reply, Request, Response, RpcError};
    use tokio::io::DuplexStream;

    async fn next_request(stream: &mut DuplexStream) -> Request {
        read_frame(stream)
            .await
            .expect("read request")
            .expect("request frame")
    }

    #[tokio::test]
    async fn concurrent_calls_are_matched_by_id() {
        let (client_side, mut visor_side) = tokio::io::duplex(4096);
        let client = RpcClient::new(AppKey::new("app"), client_side);

        let visor = tokio::spawn(async move {
            let first = next_request(&mut visor_side).await;
            let second = next_request(&mut visor_side).await;
            assert_eq!(first.namespace, AppKey::new("app"));

            // answer out of order
            for request in [second, first] {
                let result = match request.call {
                    Call::Accept { lis_id } => Ok(Reply::Accept {
                        conn_id: lis_id + 100,
                        remote: Addr::new(NetworkType::Dmsg, PubKey::NULL, 9),
                    }),
                    Call::CloseConn { .. } => Err(RpcError::UnknownHandle(4)),
                    other => panic!("unexpected call {other:?}"),
                };
                write_frame(
                    &mut visor_side,
                    &Response {
                        id: request.id,
                        result,
                    },
                )
                .await
                .expect("write response");
            }
            visor_side
        });

        let (accepted, closed) = tokio::join!(client.accept(1), client.close_conn(4));

        assert_eq!(accepted.expect("accept").0, 101);
        assert_eq!(closed, Err(Error::UnknownHandle(4)));
        drop(visor.await.expect("visor task"));
    }

    #[tokio::test]
    async fn channel_failure_fails_pending_and_later_calls() {
        let (client_side, mut visor_side) = tokio::io::duplex(4096);
        let client = RpcClient::new(AppKey::new("app"), client_side);

        let visor = tokio::spawn(async move {
            let _ = next_request(&mut visor_side).await;
            drop(visor_side);
        });

        let err = client.accept(1).await.expect_err("channel closed");
        assert!(matches!(err, Error::Channel(_)));
        visor.await.expect("visor task");

        let err = client.close_listener(1).await.expect_err("still closed");
        assert!(matches!(err, Error::Channel(_)));
    }

    #[tokio::test]
    async fn mismatched_reply_is_a_channel_error() {
        let (client_side, mut visor_side) = tokio::io::duplex(4096);
        let client = RpcClient::new(AppKey::new("app"), client_side);

        let visor = tokio::spawn(async move {
            let request = next_request(&mut visor_side).await;
            write_frame(
                &mut visor_side,
                &Response {
                    id: request.id,
                    result: Ok(Reply::Done),
                },
            )
            .await
            .expect("write response");
            visor_side
        });

        let err = client.read(1, 16).await.expect_err("wrong reply");
        assert!(matches!(err, Error::Channel(_)));
        drop(visor.await.expect("visor task"));
    }

    #[tokio::test]
    async fn connect_to_missing_socket_is_a_channel_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = RpcClient::connect(AppKey::new("app"), &dir.path().join("missing.sock"))
            .await
            .err()
            .expect("no socket");
        assert!(matches!(err, Error::Channel(_)));
    }
}
