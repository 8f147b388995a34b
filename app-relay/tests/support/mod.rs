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

use app_relay::{
    AppKey, Client, ClientConfig, LoopbackNetwork, PubKey, Server, ServerError, ServerState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

pub(crate) const VISOR_PK: &str =
    "031b80cd5773143a39d940dc0710b93dcccc262a85108018a7a95ab9af734f8055";

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn visor_pk() -> PubKey {
    VISOR_PK.parse().expect("valid visor key")
}

/// A visor serving the loopback network on a socket inside a temporary directory.
pub(crate) struct Visor {
    pub(crate) server: Arc<Server>,
    pub(crate) network: LoopbackNetwork,
    #[allow(dead_code)]
    pub(crate) serving: JoinHandle<Result<(), ServerError>>,
    pub(crate) sock_file: PathBuf,
    _dir: TempDir,
}

impl Visor {
    pub(crate) async fn start(app_keys: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let sock_file = dir.path().join("visor.sock");
        let network = LoopbackNetwork::new(visor_pk());
        let server = Arc::new(Server::new(&sock_file));
        for app_key in app_keys {
            server
                .register(
                    AppKey::new(*app_key),
                    Arc::new(network.gateway(AppKey::new(*app_key))),
                )
                .expect("register gateway");
        }

        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.listen_and_serve().await }
        });
        wait_until(|| server.state() == ServerState::Listening).await;

        Self {
            server,
            network,
            serving,
            sock_file,
            _dir: dir,
        }
    }

    pub(crate) async fn client(&self, app_key: &str) -> Client {
        Client::new(ClientConfig::new(
            visor_pk(),
            &self.sock_file,
            AppKey::new(app_key),
        ))
        .await
        .expect("client connects")
    }
}

pub(crate) async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}
