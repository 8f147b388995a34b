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

//! Visor-side dispatch target for one application.

use crate::appnet::{Addr, Port};
use crate::protocol::{Call, Reply, RpcError};
use async_trait::async_trait;

/// Realizes the control calls of one app against the visor's network stack.
///
/// Registered with [`Server::register`](crate::Server::register) under the app key.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn dial(&self, remote: Addr) -> Result<(u16, Port), RpcError>;

    async fn listen(&self, local: Addr) -> Result<(u16, Port), RpcError>;

    async fn accept(&self, lis_id: u16) -> Result<(u16, Addr), RpcError>;

    async fn close_listener(&self, lis_id: u16) -> Result<(), RpcError>;

    async fn close_conn(&self, conn_id: u16) -> Result<(), RpcError>;

    async fn read(&self, conn_id: u16, len: usize) -> Result<Vec<u8>, RpcError>;

    async fn write(&self, conn_id: u16, data: Vec<u8>) -> Result<usize, RpcError>;
}

/// Runs `call` against `gateway` and wraps the outcome as a reply.
pub async fn dispatch(gateway: &dyn Gateway, call: Call) -> Result<Reply, RpcError> {
    match call {
        Call::Dial { remote } => {
            let (conn_id, local_port) = gateway.dial(remote).await?;
            Ok(Reply::Dial {
                conn_id,
                local_port,
            })
        }
        Call::Listen { local } => {
            let (lis_id, port) = gateway.listen(local).await?;
            Ok(Reply::Listen { lis_id, port })
        }
        Call::Accept { lis_id } => {
            let (conn_id, remote) = gateway.accept(lis_id).await?;
            Ok(Reply::Accept { conn_id, remote })
        }
        Call::CloseListener { lis_id } => {
            gateway.close_listener(lis_id).await?;
            Ok(Reply::Done)
        }
        Call::CloseConn { conn_id } => {
            gateway.close_conn(conn_id).await?;
            Ok(Reply::Done)
        }
        Call::Read { conn_id, len } => Ok(Reply::Read {
            data: gateway.read(conn_id, len).await?,
        }),
        Call::Write { conn_id, data } => Ok(Reply::Write {
            written: gateway.write(conn_id, data).await?,
        }),
    }
}
