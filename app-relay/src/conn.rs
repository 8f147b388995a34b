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

//! Virtual connection relayed through the visor.

use crate::appnet::Addr;
use crate::error::{Error, Result};
use crate::observability::{events, fields};
use crate::protocol::{MAX_READ_LEN, MAX_WRITE_LEN};
use crate::registration::{Registrable, ReleaseSlot};
use crate::rpc::ControlProtocol;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const COMPONENT: &str = "conn";

/// Byte-stream connection whose real socket lives on the visor.
///
/// Produced by [`Client::dial`](crate::Client::dial) or
/// [`Listener::accept`](crate::Listener::accept) and shared as `Arc<Conn>`.
pub struct Conn {
    id: u16,
    rpc: Arc<dyn ControlProtocol>,
    local: Addr,
    remote: Addr,
    release: ReleaseSlot,
    closed: AtomicBool,
    closing: Mutex<()>,
}

impl Conn {
    pub(crate) fn new(id: u16, rpc: Arc<dyn ControlProtocol>, local: Addr, remote: Addr) -> Self {
        Self {
            id,
            rpc,
            local,
            remote,
            release: ReleaseSlot::default(),
            closed: AtomicBool::new(false),
            closing: Mutex::new(()),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn local_addr(&self) -> Addr {
        self.local
    }

    pub fn remote_addr(&self) -> Addr {
        self.remote
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reads into `buf`, returning the number of bytes read. `Ok(0)` means the peer
    /// closed its side.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let len = buf.len().min(MAX_READ_LEN);
        let data = self
            .rpc
            .read(self.id, len)
            .await
            .map_err(|err| self.closed_or(err))?;

        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    /// Writes part of `buf`, returning how much the visor accepted. At most
    /// [`MAX_WRITE_LEN`] bytes go out per call.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let len = buf.len().min(MAX_WRITE_LEN);
        self.rpc
            .write(self.id, &buf[..len])
            .await
            .map_err(|err| self.closed_or(err))
    }

    pub async fn write_all(&self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let written = self.write(buf).await?;
            if written == 0 {
                return Err(Error::ConnectionClosed);
            }
            buf = &buf[written.min(buf.len())..];
        }
        Ok(())
    }

    /// Closes the visor-side connection and drops this connection from its owner
    /// registry. Only the first call reaches the visor. Later calls wait for it to
    /// finish and return `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        let _closing = self.closing.lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.rpc.close_conn(self.id).await;
        self.release.release().await;

        match &result {
            Ok(()) => debug!(
                event = events::CONN_CLOSE_OK,
                component = COMPONENT,
                conn_id = self.id,
                local = %fields::format_addr(&self.local),
                remote = %fields::format_addr(&self.remote),
                "connection closed"
            ),
            Err(err) => warn!(
                event = events::CONN_CLOSE_FAILED,
                component = COMPONENT,
                conn_id = self.id,
                err = %err,
                "visor failed to close connection"
            ),
        }
        result
    }

    /// Once closed locally, late visor errors for this handle read as a closed
    /// connection.
    fn closed_or(&self, err: Error) -> Error {
        if self.is_closed() {
            Error::ConnectionClosed
        } else {
            err
        }
    }
}

impl Registrable for Conn {
    fn release_slot(&self) -> &ReleaseSlot {
        &self.release
    }
}

impl Debug for Conn {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}
