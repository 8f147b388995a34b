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

//! Application-side entry point.
//!
//! A [`Client`] owns the control channel to its visor and two handle registries, one
//! for listeners and one for dialed connections. Everything it hands out is an
//! `Arc` that can be closed from any task; closing the client closes all of it.

use crate::appnet::{Addr, NetworkType, Port, PubKey};
use crate::config::ClientConfig;
use crate::conn::Conn;
use crate::error::Result;
use crate::id_registry::IdRegistry;
use crate::listener::Listener;
use crate::observability::{events, fields};
use crate::registration::register;
use crate::rpc::{ControlProtocol, RpcClient};
use std::sync::Arc;
use tracing::{debug, info, warn};

const COMPONENT: &str = "client";

pub struct Client {
    visor_pk: PubKey,
    rpc: Arc<dyn ControlProtocol>,
    listeners: IdRegistry<Arc<Listener>>,
    conns: IdRegistry<Arc<Conn>>,
}

impl Client {
    /// Connects to the visor's control socket named in `config`.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let rpc = RpcClient::connect(config.app_key, &config.sock_file).await?;
        Ok(Self::with_protocol(config.visor_pk, Arc::new(rpc)))
    }

    pub fn with_protocol(visor_pk: PubKey, rpc: Arc<dyn ControlProtocol>) -> Self {
        Self {
            visor_pk,
            rpc,
            listeners: IdRegistry::new(),
            conns: IdRegistry::new(),
        }
    }

    pub fn visor_pk(&self) -> PubKey {
        self.visor_pk
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }

    /// Dials `remote`. A null public key in `remote` means this visor.
    pub async fn dial(&self, remote: Addr) -> Result<Arc<Conn>> {
        let mut remote = remote;
        if remote.pub_key.is_null() {
            remote.pub_key = self.visor_pk;
        }

        let (conn_id, local_port) = match self.rpc.dial(remote).await {
            Ok(dialed) => dialed,
            Err(err) => {
                debug!(
                    event = events::DIAL_FAILED,
                    component = COMPONENT,
                    remote = %fields::format_addr(&remote),
                    err = %err,
                    "dial rejected"
                );
                return Err(err);
            }
        };

        let local = Addr::new(remote.net, self.visor_pk, local_port);
        let conn = Arc::new(Conn::new(conn_id, self.rpc.clone(), local, remote));
        if let Err(err) = register(&self.conns, conn_id, &conn).await {
            warn!(
                event = events::REGISTER_FAILED,
                component = COMPONENT,
                conn_id,
                err = %err,
                reason = fields::REASON_REGISTRATION_FAILED,
                "unable to register dialed connection"
            );
            if let Err(close_err) = conn.close().await {
                warn!(
                    event = events::CONN_CLOSE_FAILED,
                    component = COMPONENT,
                    conn_id,
                    err = %close_err,
                    "error closing unregistered connection"
                );
            }
            return Err(err.into());
        }

        debug!(
            event = events::DIAL_OK,
            component = COMPONENT,
            conn_id,
            local = %fields::format_addr(&local),
            remote = %fields::format_addr(&remote),
            "dialed"
        );
        Ok(conn)
    }

    /// Listens on `port` of network `net`. Port 0 lets the visor pick one; the
    /// listener's [`addr`](Listener::addr) reports it.
    pub async fn listen(&self, net: NetworkType, port: Port) -> Result<Arc<Listener>> {
        let local = Addr::new(net, self.visor_pk, port);

        let (lis_id, bound_port) = match self.rpc.listen(local).await {
            Ok(bound) => bound,
            Err(err) => {
                debug!(
                    event = events::LISTEN_FAILED,
                    component = COMPONENT,
                    local = %fields::format_addr(&local),
                    err = %err,
                    "listen rejected"
                );
                return Err(err);
            }
        };

        let bound = Addr::new(net, self.visor_pk, bound_port);
        let listener = Arc::new(Listener::new(lis_id, self.rpc.clone(), bound));
        if let Err(err) = register(&self.listeners, lis_id, &listener).await {
            warn!(
                event = events::REGISTER_FAILED,
                component = COMPONENT,
                lis_id,
                err = %err,
                reason = fields::REASON_REGISTRATION_FAILED,
                "unable to register listener"
            );
            if let Err(close_err) = listener.close().await {
                warn!(
                    event = events::LISTENER_CLOSE_FAILED,
                    component = COMPONENT,
                    lis_id,
                    err = %close_err,
                    "error closing unregistered listener"
                );
            }
            return Err(err.into());
        }

        debug!(
            event = events::LISTEN_OK,
            component = COMPONENT,
            lis_id,
            local = %fields::format_addr(&bound),
            "listening"
        );
        Ok(listener)
    }

    /// Closes every listener, then every dialed connection. Individual failures are
    /// logged and do not stop the rest of the teardown.
    pub async fn close(&self) {
        let listeners = self.listeners.values();
        let conns = self.conns.values();
        info!(
            event = events::CLIENT_CLOSE_START,
            component = COMPONENT,
            listeners = listeners.len(),
            conns = conns.len(),
            "closing client"
        );

        for listener in listeners {
            if let Err(err) = listener.close().await {
                warn!(
                    event = events::LISTENER_CLOSE_FAILED,
                    component = COMPONENT,
                    lis_id = listener.id(),
                    err = %err,
                    reason = fields::REASON_TEARDOWN,
                    "error closing listener"
                );
            }
        }

        for conn in conns {
            if let Err(err) = conn.close().await {
                warn!(
                    event = events::CONN_CLOSE_FAILED,
                    component = COMPONENT,
                    conn_id = conn.id(),
                    err = %err,
                    reason = fields::REASON_TEARDOWN,
                    "error closing connection"
                );
            }
        }

        info!(
            event = events::CLIENT_CLOSE_DONE,
            component = COMPONENT,
            "client closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::Client;
    use crate::appnet::{Addr, NetworkType, PubKey};
    use crate::conn::tests::{addr, RecordingProtocol};
    use crate::error::{Error, RegistryError};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn own_key() -> PubKey {
        PubKey::from_bytes([7; 33])
    }

    fn client() -> (Arc<RecordingProtocol>, Client) {
        let protocol = Arc::new(RecordingProtocol::default());
        (protocol.clone(), Client::with_protocol(own_key(), protocol))
    }

    #[tokio::test]
    async fn dial_fills_in_own_identity() {
        let (_protocol, client) = client();

        let conn = client.dial(addr(80)).await.expect("dial");

        assert_eq!(conn.remote_addr().pub_key, own_key());
        assert_eq!(
            conn.local_addr(),
            Addr::new(NetworkType::Skynet, own_key(), 49152)
        );
        assert_eq!(client.conn_count(), 1);
    }

    #[tokio::test]
    async fn rejected_dial_leaves_no_entry() {
        let (_protocol, client) = client();

        let err = client.dial(addr(0)).await.expect_err("rejected");

        assert_eq!(err, Error::Application("connection refused".to_string()));
        assert_eq!(client.conn_count(), 0);
    }

    #[tokio::test]
    async fn listen_reports_assigned_port() {
        let (_protocol, client) = client();

        let listener = client.listen(NetworkType::Dmsg, 0).await.expect("listen");

        assert_eq!(
            listener.addr(),
            Addr::new(NetworkType::Dmsg, own_key(), 49153)
        );
        assert_eq!(client.listener_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_handles_are_closed_and_rejected() {
        let (protocol, client) = client();
        let conn = client.dial(addr(80)).await.expect("dial");
        let listener = client.listen(NetworkType::Skynet, 81).await.expect("listen");
        protocol.next_id.store(0, Ordering::SeqCst);
        protocol
            .fail_close_conn
            .lock()
            .expect("lock fail_close_conn")
            .push(conn.id());

        let dialed = client.dial(addr(80)).await;
        let listened = client.listen(NetworkType::Skynet, 82).await;

        assert_eq!(
            dialed.err(),
            Some(Error::Registry(RegistryError::DuplicateHandle(conn.id())))
        );
        assert_eq!(
            listened.err(),
            Some(Error::Registry(RegistryError::DuplicateHandle(listener.id())))
        );
        assert_eq!(protocol.close_conn_count(conn.id()), 1);
        assert_eq!(protocol.close_listener_count(listener.id()), 1);
        assert!(!conn.is_closed());
        assert!(!listener.is_closed());
        assert_eq!(client.conn_count(), 1);
        assert_eq!(client.listener_count(), 1);
    }

    #[tokio::test]
    async fn closed_conn_leaves_registry() {
        let (_protocol, client) = client();
        let conn = client.dial(addr(80)).await.expect("dial");

        conn.close().await.expect("close");

        assert_eq!(client.conn_count(), 0);
    }

    #[tokio::test]
    async fn close_tears_down_everything_despite_one_failure() {
        let (protocol, client) = client();
        let mut listeners = Vec::new();
        for port in [81, 82, 83] {
            listeners.push(client.listen(NetworkType::Skynet, port).await.expect("listen"));
        }
        let first = client.dial(addr(90)).await.expect("dial");
        let second = client.dial(addr(91)).await.expect("dial");
        protocol
            .fail_close_conn
            .lock()
            .expect("lock fail_close_conn")
            .push(first.id());

        client.close().await;

        for listener in &listeners {
            assert!(listener.is_closed());
            assert_eq!(protocol.close_listener_count(listener.id()), 1);
        }
        assert!(first.is_closed());
        assert!(second.is_closed());
        assert_eq!(protocol.close_conn_count(first.id()), 1);
        assert_eq!(protocol.close_conn_count(second.id()), 1);
        assert_eq!(client.listener_count(), 0);
        assert_eq!(client.conn_count(), 0);
    }
}
