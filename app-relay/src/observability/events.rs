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

//! Canonical structured event names used across `app-relay`.

// ID registry events.
pub const REGISTRY_ADD: &str = "registry_add";
pub const REGISTRY_RELEASE: &str = "registry_release";

// Control channel client events.
pub const CHANNEL_CONNECT_OK: &str = "channel_connect_ok";
pub const CHANNEL_CONNECT_FAILED: &str = "channel_connect_failed";
pub const CHANNEL_READ_FAILED: &str = "channel_read_failed";
pub const CHANNEL_CLOSED: &str = "channel_closed";
pub const CHANNEL_UNMATCHED_RESPONSE: &str = "channel_unmatched_response";

// Client facade and virtual socket lifecycle events.
pub const DIAL_OK: &str = "dial_ok";
pub const DIAL_FAILED: &str = "dial_failed";
pub const LISTEN_OK: &str = "listen_ok";
pub const LISTEN_FAILED: &str = "listen_failed";
pub const ACCEPT_OK: &str = "accept_ok";
pub const ACCEPT_FAILED: &str = "accept_failed";
pub const REGISTER_FAILED: &str = "register_failed";
pub const CONN_CLOSE_OK: &str = "conn_close_ok";
pub const CONN_CLOSE_FAILED: &str = "conn_close_failed";
pub const LISTENER_CLOSE_OK: &str = "listener_close_ok";
pub const LISTENER_CLOSE_FAILED: &str = "listener_close_failed";
pub const CLIENT_CLOSE_START: &str = "client_close_start";
pub const CLIENT_CLOSE_DONE: &str = "client_close_done";

// Visor-side server events.
pub const SERVER_REGISTER_GATEWAY: &str = "server_register_gateway";
pub const SERVER_LISTEN: &str = "server_listen";
pub const SERVER_ACCEPT_OK: &str = "server_accept_ok";
pub const SERVER_ACCEPT_FAILED: &str = "server_accept_failed";
pub const SERVER_CONN_DRAINED: &str = "server_conn_drained";
pub const SERVER_CONN_READ_FAILED: &str = "server_conn_read_failed";
pub const SERVER_CONN_WRITE_FAILED: &str = "server_conn_write_failed";
pub const SERVER_DISPATCH: &str = "server_dispatch";
pub const SERVER_UNKNOWN_NAMESPACE: &str = "server_unknown_namespace";
pub const SERVER_CLOSE_START: &str = "server_close_start";
pub const SERVER_CLOSE_DONE: &str = "server_close_done";

// Loopback gateway events.
pub const LOOPBACK_BIND: &str = "loopback_bind";
pub const LOOPBACK_UNBIND: &str = "loopback_unbind";
pub const LOOPBACK_CONNECT: &str = "loopback_connect";
pub const LOOPBACK_REFUSED: &str = "loopback_refused";
