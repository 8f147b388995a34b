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

use crate::appnet::{AppKey, PubKey};
use crate::error::ConfigError;
use std::path::PathBuf;

pub const ENV_APP_KEY: &str = "APP_KEY";
pub const ENV_SOCK_FILE: &str = "SOCK_FILE";
pub const ENV_VISOR_PK: &str = "VISOR_PK";

/// Identity a sandboxed app needs before it can reach its visor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientConfig {
    pub visor_pk: PubKey,
    pub sock_file: PathBuf,
    pub app_key: AppKey,
}

impl ClientConfig {
    pub fn new(visor_pk: PubKey, sock_file: impl Into<PathBuf>, app_key: AppKey) -> Self {
        Self {
            visor_pk,
            sock_file: sock_file.into(),
            app_key,
        }
    }

    /// Reads `APP_KEY`, `SOCK_FILE` and `VISOR_PK` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Variables are checked in
    /// the order app key, socket file, visor key; empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let app_key = present(ENV_APP_KEY).ok_or(ConfigError::AppKeyNotProvided)?;
        let sock_file = present(ENV_SOCK_FILE).ok_or(ConfigError::SockFileNotProvided)?;
        let visor_pk = present(ENV_VISOR_PK).ok_or(ConfigError::VisorPkNotProvided)?;
        let visor_pk = visor_pk
            .trim()
            .parse::<PubKey>()
            .map_err(|_| ConfigError::VisorPkInvalid)?;

        Ok(Self::new(visor_pk, sock_file, AppKey::new(app_key)))
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientConfig, ENV_APP_KEY, ENV_SOCK_FILE, ENV_VISOR_PK};
    use crate::appnet::{AppKey, PubKey};
    use crate::error::ConfigError;
    use std::collections::HashMap;
    use std::path::PathBuf;

    const VISOR_PK: &str = "02aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn complete_environment_builds_config() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_APP_KEY, "skychat"),
            (ENV_SOCK_FILE, "/tmp/visor.sock"),
            (ENV_VISOR_PK, VISOR_PK),
        ]))
        .expect("config");

        assert_eq!(config.app_key, AppKey::new("skychat"));
        assert_eq!(config.sock_file, PathBuf::from("/tmp/visor.sock"));
        assert_eq!(config.visor_pk, VISOR_PK.parse::<PubKey>().expect("pk"));
    }

    #[test]
    fn missing_variables_are_reported_in_order() {
        assert_eq!(
            ClientConfig::from_lookup(lookup(&[])),
            Err(ConfigError::AppKeyNotProvided)
        );
        assert_eq!(
            ClientConfig::from_lookup(lookup(&[(ENV_APP_KEY, "skychat")])),
            Err(ConfigError::SockFileNotProvided)
        );
        assert_eq!(
            ClientConfig::from_lookup(lookup(&[
                (ENV_APP_KEY, "skychat"),
                (ENV_SOCK_FILE, "/tmp/visor.sock"),
            ])),
            Err(ConfigError::VisorPkNotProvided)
        );
    }

    #[test]
    fn empty_value_counts_as_missing() {
        assert_eq!(
            ClientConfig::from_lookup(lookup(&[(ENV_APP_KEY, "")])),
            Err(ConfigError::AppKeyNotProvided)
        );
    }

    #[test]
    fn malformed_visor_key_is_invalid() {
        assert_eq!(
            ClientConfig::from_lookup(lookup(&[
                (ENV_APP_KEY, "skychat"),
                (ENV_SOCK_FILE, "/tmp/visor.sock"),
                (ENV_VISOR_PK, "not-a-key"),
            ])),
            Err(ConfigError::VisorPkInvalid)
        );
    }
}
