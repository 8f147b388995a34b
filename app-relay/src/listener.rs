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

//! Virtual listener relayed through the visor.

use crate::appnet::Addr;
use crate::conn::Conn;
use crate::error::{Error, Result};
use crate::id_registry::IdRegistry;
use crate::observability::{events, fields};
use crate::registration::{register, Registrable, ReleaseSlot};
use crate::rpc::ControlProtocol;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const COMPONENT: &str = "listener";

/// Listener bound on the visor. Owns every connection it accepted.
pub struct Listener {
    id: u16,
    rpc: Arc<dyn ControlProtocol>,
    addr: Addr,
    conns: IdRegistry<Arc<Conn>>,
    release: ReleaseSlot,
    closed: AtomicBool,
    closing: Mutex<()>,
}

impl Listener {
    pub(crate) fn new(id: u16, rpc: Arc<dyn ControlProtocol>, addr: Addr) -> Self {
        Self {
            id,
            rpc,
            addr,
            conns: IdRegistry::new(),
            release: ReleaseSlot::default(),
            closed: AtomicBool::new(false),
            closing: Mutex::new(()),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// Bound local address, including the port the visor assigned.
    pub fn addr(&self) -> Addr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of accepted connections that are still open.
    pub fn open_conns(&self) -> usize {
        self.conns.len()
    }

    /// Waits for the next peer. Fails with [`Error::ListenerClosed`] once the
    /// listener is closed, including for calls already waiting.
    pub async fn accept(&self) -> Result<Arc<Conn>> {
        if self.is_closed() {
            return Err(Error::ListenerClosed);
        }

        let (conn_id, remote) = match self.rpc.accept(self.id).await {
            Ok(accepted) => accepted,
            Err(_) if self.is_closed() => return Err(Error::ListenerClosed),
            Err(err) => {
                debug!(
                    event = events::ACCEPT_FAILED,
                    component = COMPONENT,
                    lis_id = self.id,
                    err = %err,
                    "accept failed"
                );
                return Err(err);
            }
        };

        let conn = Arc::new(Conn::new(conn_id, self.rpc.clone(), self.addr, remote));
        if let Err(err) = register(&self.conns, conn_id, &conn).await {
            warn!(
                event = events::REGISTER_FAILED,
                component = COMPONENT,
                lis_id = self.id,
                conn_id,
                err = %err,
                reason = fields::REASON_REGISTRATION_FAILED,
                "unable to register accepted connection"
            );
            if let Err(err) = conn.close().await {
                warn!(
                    event = events::CONN_CLOSE_FAILED,
                    component = COMPONENT,
                    conn_id,
                    err = %err,
                    "error closing unregistered connection"
                );
            }
            return Err(err.into());
        }

        // close() marks the listener closed before it drains `conns`, so either the
        // drain sees this connection or this check does
        if self.is_closed() {
            if let Err(err) = conn.close().await {
                warn!(
                    event = events::CONN_CLOSE_FAILED,
                    component = COMPONENT,
                    lis_id = self.id,
                    conn_id,
                    err = %err,
                    "error closing connection accepted during listener close"
                );
            }
            return Err(Error::ListenerClosed);
        }

        debug!(
            event = events::ACCEPT_OK,
            component = COMPONENT,
            lis_id = self.id,
            conn_id,
            remote = %fields::format_addr(&remote),
            "accepted connection"
        );
        Ok(conn)
    }

    /// Releases the listener handle, closes it on the visor and then closes every
    /// connection it accepted. Later calls wait for that teardown and return `Ok(())`
    /// without reaching the visor.
    pub async fn close(&self) -> Result<()> {
        let _closing = self.closing.lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.release.release().await;
        let result = self.rpc.close_listener(self.id).await;

        for conn in self.conns.values() {
            if let Err(err) = conn.close().await {
                warn!(
                    event = events::CONN_CLOSE_FAILED,
                    component = COMPONENT,
                    lis_id = self.id,
                    conn_id = conn.id(),
                    err = %err,
                    reason = fields::REASON_TEARDOWN,
                    "error closing accepted connection"
                );
            }
        }

        match &result {
            Ok(()) => debug!(
                event = events::LISTENER_CLOSE_OK,
                component = COMPONENT,
                lis_id = self.id,
                addr = %fields::format_addr(&self.addr),
                "listener closed"
            ),
            Err(err) => warn!(
                event = events::LISTENER_CLOSE_FAILED,
                component = COMPONENT,
                lis_id = self.id,
                err = %err,
                "visor failed to close listener"
            ),
        }
        result
    }
}

impl Registrable for Listener {
    fn release_slot(&self) -> &ReleaseSlot {
        &self.release
    }
}

impl Debug for Listener {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
