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

//! Error taxonomy shared by the client facade, the virtual sockets and the visor side.

use crate::protocol::RpcError;
use std::error::Error as StdError;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Missing or malformed process identity inputs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    AppKeyNotProvided,
    SockFileNotProvided,
    VisorPkNotProvided,
    VisorPkInvalid,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::AppKeyNotProvided => write!(f, "app key is not provided"),
            ConfigError::SockFileNotProvided => write!(f, "sock file is not provided"),
            ConfigError::VisorPkNotProvided => write!(f, "visor PK is not provided"),
            ConfigError::VisorPkInvalid => write!(f, "visor PK is invalid"),
        }
    }
}

impl StdError for ConfigError {}

/// ID registry failures.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RegistryError {
    DuplicateHandle(u16),
    NoFreeHandle,
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateHandle(handle) => {
                write!(f, "handle {handle} is already in use")
            }
            RegistryError::NoFreeHandle => write!(f, "no free handle left"),
        }
    }
}

impl StdError for RegistryError {}

/// Errors surfaced to callers of the client facade and the virtual sockets.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    Config(ConfigError),
    /// The control channel could not be used (dial, read, write or framing failure).
    Channel(String),
    Registry(RegistryError),
    /// The visor rejected the request.
    Application(String),
    ListenerClosed,
    ConnectionClosed,
    UnknownHandle(u16),
}

impl Error {
    pub(crate) fn channel(context: &str, err: impl Display) -> Self {
        Error::Channel(format!("{context}: {err}"))
    }

    /// Reports whether the error means "intentionally closed" rather than "broke".
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ListenerClosed | Error::ConnectionClosed)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(err) => write!(f, "configuration error: {err}"),
            Error::Channel(reason) => write!(f, "control channel error: {reason}"),
            Error::Registry(err) => write!(f, "registry error: {err}"),
            Error::Application(reason) => write!(f, "{reason}"),
            Error::ListenerClosed => write!(f, "listener is closed"),
            Error::ConnectionClosed => write!(f, "connection is closed"),
            Error::UnknownHandle(handle) => write!(f, "unknown handle {handle}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Config(err) => Some(err),
            Error::Registry(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Error::Registry(err)
    }
}

impl From<RpcError> for Error {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Application(reason) => Error::Application(reason),
            RpcError::ListenerClosed => Error::ListenerClosed,
            RpcError::ConnectionClosed => Error::ConnectionClosed,
            RpcError::UnknownHandle(handle) => Error::UnknownHandle(handle),
            RpcError::UnknownNamespace(namespace) => {
                Error::Application(format!("rpc: can't find service \"{namespace}\""))
            }
        }
    }
}

/// Visor-side control server failures.
#[derive(Debug)]
pub enum ServerError {
    AlreadyRegistered(String),
    Bind(PathBuf, io::Error),
    Accept(io::Error),
    /// The accept endpoint was closed by [`Server::close`](crate::Server::close).
    EndpointClosed,
    Cleanup(PathBuf, io::Error),
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::AlreadyRegistered(app_key) => {
                write!(f, "gateway for app key {app_key} is already registered")
            }
            ServerError::Bind(path, err) => {
                write!(f, "unable to bind control socket {}: {err}", path.display())
            }
            ServerError::Accept(err) => write!(f, "unable to accept control connection: {err}"),
            ServerError::EndpointClosed => write!(f, "control endpoint is closed"),
            ServerError::Cleanup(path, err) => {
                write!(f, "unable to remove control socket {}: {err}", path.display())
            }
        }
    }
}

impl StdError for ServerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ServerError::Bind(_, err) | ServerError::Accept(err) | ServerError::Cleanup(_, err) => {
                Some(err)
            }
            _ => None,
        }
    }
}
