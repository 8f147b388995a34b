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

use app_relay::{Client, ClientConfig, Error};
use clap::Parser;
use common::{cli, DEFAULT_NET, DEFAULT_PORT};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Network to listen on (dmsg or skynet)
    #[arg(long, default_value = DEFAULT_NET)]
    net: String,
    /// Port to listen on (decimal or 0x-prefixed hex, 0 lets the visor pick)
    #[arg(short, long, default_value = DEFAULT_PORT)]
    port: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();

    let args = Args::parse();
    let net = cli::parse_network_flag("--net", &args.net)?;
    let port = cli::parse_port_flag("--port", &args.port)?;

    // APP_KEY, SOCK_FILE and VISOR_PK are set by the visor that spawned us
    let config = ClientConfig::from_env()?;
    info!("Started echo_server as {}", config.app_key);
    let client = Client::new(config).await?;
    let listener = client.listen(net, port).await?;
    info!("Listening on {}", listener.addr());

    loop {
        let accepted = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Received ctrl-c, shutting down");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        let conn = match accepted {
            Ok(conn) => conn,
            Err(Error::ListenerClosed) => break,
            Err(err) => {
                error!("Accept failed: {err}");
                break;
            }
        };

        info!("Accepted connection from {}", conn.remote_addr());
        tokio::spawn(async move {
            match common::echo_until_eof(&conn).await {
                Ok(echoed) => info!("Echoed {echoed} bytes to {}", conn.remote_addr()),
                Err(err) => warn!("Echo to {} failed: {err}", conn.remote_addr()),
            }
            let _ = conn.close().await;
        });
    }

    client.close().await;
    Ok(())
}
