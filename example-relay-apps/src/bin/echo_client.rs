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

mod common;

use app_relay::{Addr, Client, ClientConfig, PubKey};
use clap::Parser;
use common::{cli, DEFAULT_NET, DEFAULT_PORT};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Network of the echo server (dmsg or skynet)
    #[arg(long, default_value = DEFAULT_NET)]
    net: String,
    /// Port of the echo server (decimal or 0x-prefixed hex)
    #[arg(short, long, default_value = DEFAULT_PORT)]
    port: String,
    /// Visor key of the echo server; defaults to our own visor
    #[arg(long)]
    remote_pk: Option<String>,
    /// Message to send on every round
    #[arg(short, long, default_value = "hello from echo_client")]
    message: String,
    /// Number of round trips
    #[arg(short, long, default_value_t = 3)]
    count: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();

    let args = Args::parse();
    let net = cli::parse_network_flag("--net", &args.net)?;
    let port = cli::parse_port_flag("--port", &args.port)?;
    let remote_pk = match &args.remote_pk {
        Some(raw) => raw
            .parse::<PubKey>()
            .map_err(|err| format!("invalid value for --remote-pk: '{raw}' ({err})"))?,
        None => PubKey::NULL,
    };

    let config = ClientConfig::from_env()?;
    info!("Started echo_client as {}", config.app_key);
    let client = Client::new(config).await?;

    let conn = client.dial(Addr::new(net, remote_pk, port)).await?;
    info!("Connected {} -> {}", conn.local_addr(), conn.remote_addr());

    for round in 1..=args.count {
        conn.write_all(args.message.as_bytes()).await?;
        let echoed = common::read_len(&conn, args.message.len()).await?;
        if echoed != args.message.as_bytes() {
            warn!("Round {round}: echo mismatch ({} bytes back)", echoed.len());
        } else {
            info!("Round {round}: {}", String::from_utf8_lossy(&echoed));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    client.close().await;
    Ok(())
}
