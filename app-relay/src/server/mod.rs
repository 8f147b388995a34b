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

//! Visor-side control server.
//!
//! Binds the control socket, accepts one connection per app process and dispatches
//! each request to the gateway registered under the request's app key. Shutdown is
//! a single broadcast flag; [`Server::close`] raises it and waits until every serving
//! routine has drained.

mod connection;

use crate::appnet::AppKey;
use crate::error::ServerError;
use crate::gateway::Gateway;
use crate::observability::events;
use crate::signal::{wait_until_set, WaitGroup};
use connection::{serve, Gateways, ServedConn};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const COMPONENT: &str = "server";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerState {
    Created,
    Listening,
    Closing,
    Closed,
}

pub struct Server {
    sock_file: PathBuf,
    gateways: Gateways,
    state: Mutex<ServerState>,
    shutdown: watch::Sender<bool>,
    serving: WaitGroup,
    requests: WaitGroup,
    next_conn: AtomicU64,
}

impl Server {
    pub fn new(sock_file: impl Into<PathBuf>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            sock_file: sock_file.into(),
            gateways: Arc::new(RwLock::new(HashMap::new())),
            state: Mutex::new(ServerState::Created),
            shutdown,
            serving: WaitGroup::new(),
            requests: WaitGroup::new(),
            next_conn: AtomicU64::new(1),
        }
    }

    pub fn sock_file(&self) -> &Path {
        &self.sock_file
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of control connections currently being served.
    pub fn active_conns(&self) -> usize {
        self.serving.outstanding()
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Binds `gateway` as the dispatch target for requests namespaced `app_key`.
    pub fn register(&self, app_key: AppKey, gateway: Arc<dyn Gateway>) -> Result<(), ServerError> {
        let mut gateways = self
            .gateways
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if gateways.contains_key(&app_key) {
            return Err(ServerError::AlreadyRegistered(app_key.to_string()));
        }

        info!(
            event = events::SERVER_REGISTER_GATEWAY,
            component = COMPONENT,
            app_key = %app_key,
            "gateway registered"
        );
        gateways.insert(app_key, gateway);
        Ok(())
    }

    /// Serves the control socket until [`close`](Self::close) is called or accepting
    /// fails. Always returns an error; [`ServerError::EndpointClosed`] after a close.
    pub async fn listen_and_serve(&self) -> Result<(), ServerError> {
        if self.state() != ServerState::Created {
            return Err(ServerError::EndpointClosed);
        }

        remove_socket_file(&self.sock_file)
            .map_err(|err| ServerError::Bind(self.sock_file.clone(), err))?;
        let listener = UnixListener::bind(&self.sock_file)
            .map_err(|err| ServerError::Bind(self.sock_file.clone(), err))?;

        // the accept loop itself is part of the drain, so a close waits for it too
        let _accepting = self.serving.add();
        let mut shutdown = self.shutdown.subscribe();
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != ServerState::Created || *shutdown.borrow() {
                drop(state);
                let _ = remove_socket_file(&self.sock_file);
                return Err(ServerError::EndpointClosed);
            }
            *state = ServerState::Listening;
        }
        info!(
            event = events::SERVER_LISTEN,
            component = COMPONENT,
            sock_file = %self.sock_file.display(),
            "serving control socket"
        );

        loop {
            let accepted = tokio::select! {
                biased;
                _ = wait_until_set(&mut shutdown) => return Err(ServerError::EndpointClosed),
                accepted = listener.accept() => accepted,
            };

            let stream = match accepted {
                Ok((stream, _)) => stream,
                Err(err) => {
                    warn!(
                        event = events::SERVER_ACCEPT_FAILED,
                        component = COMPONENT,
                        err = %err,
                        "unable to accept control connection"
                    );
                    return Err(ServerError::Accept(err));
                }
            };

            let drained = self.serving.add();
            if *self.shutdown.borrow() {
                return Err(ServerError::EndpointClosed);
            }

            let id = self.next_conn.fetch_add(1, Ordering::Relaxed);
            debug!(
                event = events::SERVER_ACCEPT_OK,
                component = COMPONENT,
                conn = id,
                "control connection accepted"
            );
            tokio::spawn(serve(
                ServedConn {
                    id,
                    stream,
                    gateways: self.gateways.clone(),
                    shutdown: self.shutdown.subscribe(),
                    requests: self.requests.clone(),
                },
                drained,
            ));
        }
    }

    /// Stops accepting, tells every serving routine to close its connection and
    /// waits for all of them. The socket-removal error, if any, is returned after the
    /// drain completes.
    pub async fn close(&self) -> Result<(), ServerError> {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = *state;
            if previous == ServerState::Listening || previous == ServerState::Created {
                *state = ServerState::Closing;
            }
            previous
        };
        info!(
            event = events::SERVER_CLOSE_START,
            component = COMPONENT,
            state = ?previous,
            "closing server"
        );

        self.shutdown.send_replace(true);
        let result = if previous == ServerState::Listening {
            remove_socket_file(&self.sock_file)
                .map_err(|err| ServerError::Cleanup(self.sock_file.clone(), err))
        } else {
            Ok(())
        };

        self.serving.wait().await;
        self.requests.wait().await;
        self.set_state(ServerState::Closed);

        info!(
            event = events::SERVER_CLOSE_DONE,
            component = COMPONENT,
            "server closed"
        );
        result
    }
}

fn remove_socket_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
