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

use app_relay::{Conn, Error};
use tracing::debug;

pub(crate) mod cli;

pub(crate) const DEFAULT_NET: &str = "skynet";
pub(crate) const DEFAULT_PORT: &str = "40000";

/// Copies everything read from `conn` back to it until the peer closes its side.
#[allow(dead_code)]
pub(crate) async fn echo_until_eof(conn: &Conn) -> Result<usize, Error> {
    let mut buf = vec![0u8; 4096];
    let mut echoed = 0;
    loop {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            debug!(conn_id = conn.id(), echoed, "peer closed");
            return Ok(echoed);
        }
        conn.write_all(&buf[..n]).await?;
        echoed += n;
    }
}

/// Reads until `len` bytes arrived or the peer closed.
#[allow(dead_code)]
pub(crate) async fn read_len(conn: &Conn, len: usize) -> Result<Vec<u8>, Error> {
    let mut received = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = conn.read(&mut received[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    received.truncate(filled);
    Ok(received)
}
