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

use app_relay::{AppKey, PubKey};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub(crate) public_key: PubKey,
    pub(crate) sock_file: PathBuf,
    pub(crate) apps: Vec<AppConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub(crate) app_key: AppKey,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Unable to read config file {}: {e}", path.display()))?;
        let config = json5::from_str(&contents)
            .map_err(|e| format!("Unable to parse config file {}: {e}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use app_relay::AppKey;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"{
        // trailing commas and comments are fine in json5
        public_key: "031b80cd5773143a39d940dc0710b93dcccc262a85108018a7a95ab9af734f8055",
        sock_file: "/tmp/visor.sock",
        apps: [{ app_key: "skychat" }, { app_key: "vpn-client" },],
    }"#;

    #[test]
    fn sample_config_parses() {
        let config: Config = json5::from_str(SAMPLE).expect("parse");

        assert_eq!(config.sock_file, PathBuf::from("/tmp/visor.sock"));
        assert_eq!(
            config.apps.iter().map(|app| app.app_key.clone()).collect::<Vec<_>>(),
            vec![AppKey::new("skychat"), AppKey::new("vpn-client")]
        );
        assert_eq!(
            config.public_key.to_string(),
            "031b80cd5773143a39d940dc0710b93dcccc262a85108018a7a95ab9af734f8055"
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let with_extra = SAMPLE.replace("apps:", "hypervisor: true, apps:");
        assert!(json5::from_str::<Config>(&with_extra).is_err());
    }

    #[test]
    fn malformed_public_key_is_rejected() {
        let short_key = SAMPLE.replace("8055", "");
        assert!(json5::from_str::<Config>(&short_key).is_err());
    }

    #[test]
    fn bundled_config_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/visor.json5");
        let config = Config::from_file(path).expect("bundled config");
        assert_eq!(config.apps.len(), 2);
    }
}
