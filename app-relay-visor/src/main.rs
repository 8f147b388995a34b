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

mod config;

use crate::config::Config;
use app_relay::{LoopbackNetwork, Server};
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command()]
struct VisorArgs {
    #[arg(short, long, value_name = "FILE")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = tracing_subscriber::fmt::try_init();

    info!("Started app-relay-visor");

    let args = VisorArgs::parse();
    let config = Config::from_file(&args.config)?;

    let network = LoopbackNetwork::new(config.public_key);
    let server = Arc::new(Server::new(&config.sock_file));
    for app in &config.apps {
        let gateway = Arc::new(network.gateway(app.app_key.clone()));
        server.register(app.app_key.clone(), gateway)?;
    }

    info!(
        visor_pk = %config.public_key,
        sock_file = %config.sock_file.display(),
        apps = config.apps.len(),
        "Serving apps"
    );
    let mut serving = tokio::spawn({
        let server = server.clone();
        async move { server.listen_and_serve().await }
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received ctrl-c, closing visor");
        }
        served = &mut serving => {
            if let Err(err) = served? {
                error!("Control server stopped: {err}");
                return Err(err.into());
            }
            return Ok(());
        }
    }

    server.close().await?;
    let _ = serving.await;
    info!("Visor closed");

    Ok(())
}
