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

//! Overlay-network addressing and application identity.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Port within one visor's overlay identity.
pub type Port = u16;

/// Length of a compressed public key.
pub const PUB_KEY_LEN: usize = 33;

/// Network an [`Addr`] belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Dmsg,
    Skynet,
}

impl Display for NetworkType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::Dmsg => write!(f, "dmsg"),
            NetworkType::Skynet => write!(f, "skynet"),
        }
    }
}

/// Failure to parse a [`PubKey`] from its hex text form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PubKeyParseError {
    InvalidHex,
    InvalidLength(usize),
}

impl Display for PubKeyParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PubKeyParseError::InvalidHex => write!(f, "public key is not valid hex"),
            PubKeyParseError::InvalidLength(len) => {
                write!(f, "public key has {len} bytes, expected {PUB_KEY_LEN}")
            }
        }
    }
}

impl Error for PubKeyParseError {}

/// Identity public key of a visor.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct PubKey([u8; PUB_KEY_LEN]);

impl PubKey {
    pub const NULL: PubKey = PubKey([0; PUB_KEY_LEN]);

    pub fn from_bytes(bytes: [u8; PUB_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUB_KEY_LEN] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Display for PubKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for PubKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({self})")
    }
}

impl FromStr for PubKey {
    type Err = PubKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| PubKeyParseError::InvalidHex)?;
        let bytes: [u8; PUB_KEY_LEN] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| PubKeyParseError::InvalidLength(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for PubKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Endpoint in the overlay network.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Addr {
    pub net: NetworkType,
    pub pub_key: PubKey,
    pub port: Port,
}

impl Addr {
    pub fn new(net: NetworkType, pub_key: PubKey, port: Port) -> Self {
        Self { net, pub_key, port }
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pub_key, self.port)
    }
}

/// Opaque identity of one application instance; names its RPC gateway.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppKey(String);

impl AppKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AppKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}
