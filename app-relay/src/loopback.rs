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

//! In-process network that routes between the apps of one visor.
//!
//! Each app gets a [`LoopbackGateway`] with its own visor-side handle registries.
//! Bound ports are shared through the [`LoopbackNetwork`]; a dial to a bound port
//! hands one end of an in-memory duplex stream to the listener's accept queue.

use crate::appnet::{Addr, AppKey, NetworkType, Port, PubKey};
use crate::error::RegistryError;
use crate::gateway::Gateway;
use crate::id_registry::IdRegistry;
use crate::observability::{events, fields};
use crate::protocol::{RpcError, MAX_READ_LEN};
use crate::signal::wait_until_set;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

const COMPONENT: &str = "loopback";

pub const EPHEMERAL_PORT_START: Port = 49152;

const STREAM_BUFFER: usize = 64 * 1024;

const REFUSED: &str = "connection refused";

struct PendingConn {
    stream: DuplexStream,
    remote: Addr,
}

type AcceptQueue = mpsc::UnboundedSender<PendingConn>;

struct NetworkState {
    bound: HashMap<(NetworkType, Port), AcceptQueue>,
    // local ports of dialed connections, held until the dialer closes
    dialed: HashSet<(NetworkType, Port)>,
    next_ephemeral: Port,
}

impl NetworkState {
    fn in_use(&self, key: &(NetworkType, Port)) -> bool {
        self.bound.contains_key(key) || self.dialed.contains(key)
    }

    fn ephemeral_port(&mut self, net: NetworkType) -> Option<Port> {
        let span = (Port::MAX - EPHEMERAL_PORT_START) as usize + 1;
        for _ in 0..span {
            let port = self.next_ephemeral;
            self.next_ephemeral = if port == Port::MAX {
                EPHEMERAL_PORT_START
            } else {
                port + 1
            };
            if !self.in_use(&(net, port)) {
                return Some(port);
            }
        }
        None
    }
}

/// Port space of one visor, shared by the gateways of all its apps.
#[derive(Clone)]
pub struct LoopbackNetwork {
    visor_pk: PubKey,
    state: Arc<StdMutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new(visor_pk: PubKey) -> Self {
        Self {
            visor_pk,
            state: Arc::new(StdMutex::new(NetworkState {
                bound: HashMap::new(),
                dialed: HashSet::new(),
                next_ephemeral: EPHEMERAL_PORT_START,
            })),
        }
    }

    pub fn visor_pk(&self) -> PubKey {
        self.visor_pk
    }

    pub fn gateway(&self, app_key: AppKey) -> LoopbackGateway {
        LoopbackGateway {
            app_key,
            network: self.clone(),
            listeners: IdRegistry::new(),
            conns: IdRegistry::new(),
        }
    }

    pub fn is_bound(&self, net: NetworkType, port: Port) -> bool {
        self.lock().bound.contains_key(&(net, port))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bind(
        &self,
        local: Addr,
    ) -> Result<(Addr, AcceptQueue, mpsc::UnboundedReceiver<PendingConn>), RpcError> {
        if local.pub_key != self.visor_pk {
            return Err(RpcError::application("identity mismatch"));
        }

        let mut state = self.lock();
        let port = match local.port {
            0 => state
                .ephemeral_port(local.net)
                .ok_or_else(|| RpcError::application("no free port"))?,
            port if state.in_use(&(local.net, port)) => {
                return Err(RpcError::application("port already bound"));
            }
            port => port,
        };

        let (queue, incoming) = mpsc::unbounded_channel();
        state.bound.insert((local.net, port), queue.clone());
        Ok((Addr::new(local.net, local.pub_key, port), queue, incoming))
    }

    /// Frees `addr` if it is still bound by the listener owning `queue`.
    fn unbind(&self, addr: &Addr, queue: &AcceptQueue) {
        let mut state = self.lock();
        let key = (addr.net, addr.port);
        if matches!(state.bound.get(&key), Some(bound) if bound.same_channel(queue)) {
            state.bound.remove(&key);
        }
    }

    /// Finds the accept queue behind `remote` and reserves the dialer's local address
    /// until [`release_dialed`](Self::release_dialed).
    fn route(&self, remote: Addr) -> Result<(Addr, AcceptQueue), RpcError> {
        if remote.pub_key != self.visor_pk {
            return Err(RpcError::application(REFUSED));
        }

        let mut state = self.lock();
        let queue = state
            .bound
            .get(&(remote.net, remote.port))
            .cloned()
            .ok_or_else(|| RpcError::application(REFUSED))?;
        let port = state
            .ephemeral_port(remote.net)
            .ok_or_else(|| RpcError::application("no free port"))?;
        state.dialed.insert((remote.net, port));
        Ok((Addr::new(remote.net, self.visor_pk, port), queue))
    }

    fn release_dialed(&self, local: &Addr) {
        self.lock().dialed.remove(&(local.net, local.port));
    }
}

struct LoopbackListener {
    addr: Addr,
    queue: AcceptQueue,
    incoming: Mutex<mpsc::UnboundedReceiver<PendingConn>>,
    closed: watch::Sender<bool>,
}

impl LoopbackListener {
    async fn next(&self) -> Result<PendingConn, RpcError> {
        let mut closed = self.closed.subscribe();
        let incoming = async { self.incoming.lock().await.recv().await };

        tokio::select! {
            biased;
            _ = wait_until_set(&mut closed) => Err(RpcError::ListenerClosed),
            pending = incoming => pending.ok_or(RpcError::ListenerClosed),
        }
    }
}

struct LoopbackConn {
    reader: Mutex<ReadHalf<DuplexStream>>,
    writer: Mutex<WriteHalf<DuplexStream>>,
    closed: watch::Sender<bool>,
    /// Local address reserved by the dial that opened this side, if any.
    dialed_from: Option<Addr>,
}

impl LoopbackConn {
    fn new(stream: DuplexStream, dialed_from: Option<Addr>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed,
            dialed_from,
        }
    }

    async fn read(&self, len: usize) -> Result<Vec<u8>, RpcError> {
        let mut closed = self.closed.subscribe();
        let read = async {
            let mut buf = vec![0u8; len.min(MAX_READ_LEN)];
            let n = self.reader.lock().await.read(&mut buf).await?;
            buf.truncate(n);
            Ok::<_, io::Error>(buf)
        };

        tokio::select! {
            biased;
            _ = wait_until_set(&mut closed) => Err(RpcError::ConnectionClosed),
            data = read => data.map_err(stream_error),
        }
    }

    async fn write(&self, data: Vec<u8>) -> Result<usize, RpcError> {
        let mut closed = self.closed.subscribe();
        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(&data).await?;
            writer.flush().await?;
            Ok::<_, io::Error>(data.len())
        };

        tokio::select! {
            biased;
            _ = wait_until_set(&mut closed) => Err(RpcError::ConnectionClosed),
            written = write => written.map_err(stream_error),
        }
    }

    /// Wakes local readers and writers, then signals EOF to the peer.
    async fn close(&self) {
        self.closed.send_replace(true);
        let _ = self.writer.lock().await.shutdown().await;
    }
}

fn stream_error(err: io::Error) -> RpcError {
    match err.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => RpcError::ConnectionClosed,
        _ => RpcError::application(err.to_string()),
    }
}

fn registry_error(err: RegistryError) -> RpcError {
    RpcError::application(err.to_string())
}

/// Visor-side gateway of one app on a [`LoopbackNetwork`].
pub struct LoopbackGateway {
    app_key: AppKey,
    network: LoopbackNetwork,
    listeners: IdRegistry<Arc<LoopbackListener>>,
    conns: IdRegistry<Arc<LoopbackConn>>,
}

impl LoopbackGateway {
    pub fn app_key(&self) -> &AppKey {
        &self.app_key
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }

    fn conn(&self, conn_id: u16) -> Result<Arc<LoopbackConn>, RpcError> {
        self.conns
            .get(conn_id)
            .ok_or(RpcError::UnknownHandle(conn_id))
    }
}

#[async_trait]
impl Gateway for LoopbackGateway {
    async fn dial(&self, remote: Addr) -> Result<(u16, Port), RpcError> {
        let reservation = self.conns.reserve_next().map_err(registry_error)?;
        let (local, queue) = match self.network.route(remote) {
            Ok(route) => route,
            Err(err) => {
                debug!(
                    event = events::LOOPBACK_REFUSED,
                    component = COMPONENT,
                    app_key = %self.app_key,
                    remote = %fields::format_addr(&remote),
                    "no listener bound"
                );
                return Err(err);
            }
        };

        let (ours, theirs) = tokio::io::duplex(STREAM_BUFFER);
        let queued = queue.send(PendingConn {
            stream: theirs,
            remote: local,
        });
        if queued.is_err() {
            self.network.release_dialed(&local);
            return Err(RpcError::application(REFUSED));
        }

        let conn_id = reservation.handle();
        reservation.commit(Arc::new(LoopbackConn::new(ours, Some(local))));
        debug!(
            event = events::LOOPBACK_CONNECT,
            component = COMPONENT,
            app_key = %self.app_key,
            conn_id,
            local = %fields::format_addr(&local),
            remote = %fields::format_addr(&remote),
            "dial queued for accept"
        );
        Ok((conn_id, local.port))
    }

    async fn listen(&self, local: Addr) -> Result<(u16, Port), RpcError> {
        let reservation = self.listeners.reserve_next().map_err(registry_error)?;
        let (addr, queue, incoming) = self.network.bind(local)?;
        let (closed, _) = watch::channel(false);

        let lis_id = reservation.handle();
        reservation.commit(Arc::new(LoopbackListener {
            addr,
            queue,
            incoming: Mutex::new(incoming),
            closed,
        }));
        debug!(
            event = events::LOOPBACK_BIND,
            component = COMPONENT,
            app_key = %self.app_key,
            lis_id,
            local = %fields::format_addr(&addr),
            "port bound"
        );
        Ok((lis_id, addr.port))
    }

    async fn accept(&self, lis_id: u16) -> Result<(u16, Addr), RpcError> {
        // listener handles are not reused right away, so an unknown handle is one
        // that was closed underneath the caller
        let listener = self
            .listeners
            .get(lis_id)
            .ok_or(RpcError::ListenerClosed)?;
        let pending = listener.next().await?;

        let reservation = self.conns.reserve_next().map_err(registry_error)?;
        let conn_id = reservation.handle();
        reservation.commit(Arc::new(LoopbackConn::new(pending.stream, None)));
        Ok((conn_id, pending.remote))
    }

    async fn close_listener(&self, lis_id: u16) -> Result<(), RpcError> {
        let listener = self
            .listeners
            .remove(lis_id)
            .ok_or(RpcError::UnknownHandle(lis_id))?;
        self.network.unbind(&listener.addr, &listener.queue);
        listener.closed.send_replace(true);
        debug!(
            event = events::LOOPBACK_UNBIND,
            component = COMPONENT,
            app_key = %self.app_key,
            lis_id,
            local = %fields::format_addr(&listener.addr),
            "port unbound"
        );
        Ok(())
    }

    async fn close_conn(&self, conn_id: u16) -> Result<(), RpcError> {
        let conn = self
            .conns
            .remove(conn_id)
            .ok_or(RpcError::UnknownHandle(conn_id))?;
        conn.close().await;
        if let Some(local) = &conn.dialed_from {
            self.network.release_dialed(local);
        }
        Ok(())
    }

    async fn read(&self, conn_id: u16, len: usize) -> Result<Vec<u8>, RpcError> {
        self.conn(conn_id)?.read(len).await
    }

    async fn write(&self, conn_id: u16, data: Vec<u8>) -> Result<usize, RpcError> {
        self.conn(conn_id)?.write(data).await
    }
}
