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

use app_relay::{NetworkType, Port};

fn format_parse_error(flag: &str, raw: &str, expected: &str, max: u128) -> String {
    format!(
        "invalid value for {flag}: '{raw}' (expected {expected} in decimal or 0x-prefixed hex, range 0..={max})"
    )
}

fn parse_unsigned(flag: &str, raw: &str, expected: &str, max: u128) -> Result<u128, String> {
    if raw.is_empty() || raw.chars().any(char::is_whitespace) || raw.contains('_') {
        return Err(format_parse_error(flag, raw, expected, max));
    }

    let parsed = if let Some(hex_digits) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))
    {
        if hex_digits.is_empty() {
            return Err(format_parse_error(flag, raw, expected, max));
        }
        u128::from_str_radix(hex_digits, 16)
            .map_err(|_| format_parse_error(flag, raw, expected, max))?
    } else {
        raw.parse::<u128>()
            .map_err(|_| format_parse_error(flag, raw, expected, max))?
    };

    if parsed > max {
        return Err(format_parse_error(flag, raw, expected, max));
    }

    Ok(parsed)
}

pub(crate) fn parse_port_flag(flag: &str, raw: &str) -> Result<Port, String> {
    parse_unsigned(flag, raw, "port", Port::MAX as u128).map(|value| value as Port)
}

pub(crate) fn parse_network_flag(flag: &str, raw: &str) -> Result<NetworkType, String> {
    match raw {
        "dmsg" => Ok(NetworkType::Dmsg),
        "skynet" => Ok(NetworkType::Skynet),
        _ => Err(format!(
            "invalid value for {flag}: '{raw}' (expected one of: dmsg, skynet)"
        )),
    }
}
