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

//! Control channel messages and framing.
//!
//! Each frame is a 4-byte big-endian length followed by a JSON body. Requests carry
//! the app key as dispatch namespace and a caller-chosen `id` echoed by the response.

use crate::appnet::{Addr, AppKey, Port};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Largest chunk a single `Read` call asks for.
pub const MAX_READ_LEN: usize = 64 * 1024;

/// Largest chunk a single `Write` call carries. JSON spends up to four bytes per
/// data byte, so a full chunk stays well inside [`MAX_FRAME_LEN`].
pub const MAX_WRITE_LEN: usize = 64 * 1024;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Call {
    Dial { remote: Addr },
    Listen { local: Addr },
    Accept { lis_id: u16 },
    CloseListener { lis_id: u16 },
    CloseConn { conn_id: u16 },
    Read { conn_id: u16, len: usize },
    Write { conn_id: u16, data: Vec<u8> },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Dial { conn_id: u16, local_port: Port },
    Listen { lis_id: u16, port: Port },
    Accept { conn_id: u16, remote: Addr },
    Read { data: Vec<u8> },
    Write { written: usize },
    Done,
}

/// Rejection reported by the visor for one call.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RpcError {
    Application(String),
    ListenerClosed,
    ConnectionClosed,
    UnknownHandle(u16),
    UnknownNamespace(String),
}

impl RpcError {
    pub fn application(reason: impl Into<String>) -> Self {
        RpcError::Application(reason.into())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub namespace: AppKey,
    pub call: Call,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<Reply, RpcError>,
}

/// Writes one length-prefixed JSON frame.
pub async fn write_frame<W, M>(writer: &mut W, message: &M) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds {MAX_FRAME_LEN}", body.len()),
        ));
    }

    let len = u32::try_from(body.len())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Reads one frame. Returns `Ok(None)` on a clean EOF between frames.
pub async fn read_frame<R, M>(reader: &mut R) -> io::Result<Option<M>>
where
    R: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds {MAX_FRAME_LEN}"),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let message = serde_json::from_slice(&body)?;
    Ok(Some(message))
}
