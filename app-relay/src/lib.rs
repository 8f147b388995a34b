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

//! # app-relay
//!
//! `app-relay` lets a sandboxed application do virtual networking without a network
//! stack of its own. Every Dial, Listen, Accept and Close is relayed over one local
//! control channel to the visor, which owns the real overlay stack.
//!
//! The application side is [`Client`]: it hands out [`Listener`]s and [`Conn`]s that
//! are thin proxies over 16-bit handles living on the visor. The visor side is
//! [`Server`], which dispatches each app's calls to a [`Gateway`].
//!
//! ```
//! use std::sync::Arc;
//! use app_relay::{AppKey, Client, ClientConfig, LoopbackNetwork, NetworkType, PubKey, Server};
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let dir = tempfile::tempdir().unwrap();
//! let sock_file = dir.path().join("visor.sock");
//! let visor_pk: PubKey = "03".repeat(33).parse().unwrap();
//!
//! let network = LoopbackNetwork::new(visor_pk);
//! let server = Arc::new(Server::new(&sock_file));
//! server
//!     .register(AppKey::new("echo"), Arc::new(network.gateway(AppKey::new("echo"))))
//!     .unwrap();
//! let serving = tokio::spawn({
//!     let server = server.clone();
//!     async move { server.listen_and_serve().await }
//! });
//! # while server.state() != app_relay::ServerState::Listening {
//! #     tokio::task::yield_now().await;
//! # }
//!
//! let config = ClientConfig::new(visor_pk, &sock_file, AppKey::new("echo"));
//! let client = Client::new(config).await.unwrap();
//! let listener = client.listen(NetworkType::Skynet, 0).await.unwrap();
//! let dialed = client.dial(listener.addr()).await.unwrap();
//! let accepted = listener.accept().await.unwrap();
//!
//! dialed.write_all(b"hello").await.unwrap();
//! let mut buf = [0u8; 5];
//! let n = accepted.read(&mut buf).await.unwrap();
//! assert_eq!(&buf[..n], b"hello");
//!
//! client.close().await;
//! server.close().await.unwrap();
//! # let _ = serving.await;
//! # });
//! ```

mod appnet;
pub use appnet::{Addr, AppKey, NetworkType, Port, PubKey, PubKeyParseError, PUB_KEY_LEN};

mod client;
pub use client::Client;

mod config;
pub use config::{ClientConfig, ENV_APP_KEY, ENV_SOCK_FILE, ENV_VISOR_PK};

mod conn;
pub use conn::Conn;

mod error;
pub use error::{ConfigError, Error, RegistryError, Result, ServerError};

mod gateway;
pub use gateway::{dispatch, Gateway};

pub mod id_registry;
pub use id_registry::IdRegistry;

mod listener;
pub use listener::Listener;

mod loopback;
pub use loopback::{LoopbackGateway, LoopbackNetwork, EPHEMERAL_PORT_START};

#[doc(hidden)]
pub mod observability;

pub mod protocol;
mod registration;

mod rpc;
pub use rpc::{ControlProtocol, RpcClient};

mod server;
pub use server::{Server, ServerState};

mod signal;
