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

//! Canonical structured field values and value-format helpers.

use crate::appnet::Addr;
use crate::protocol::Call;

pub const REASON_SHUTDOWN: &str = "shutdown";
pub const REASON_PEER_CLOSED: &str = "peer_closed";
pub const REASON_TEARDOWN: &str = "teardown";
pub const REASON_REGISTRATION_FAILED: &str = "registration_failed";

pub fn format_addr(addr: &Addr) -> String {
    format!("{}/{addr}", addr.net)
}

/// Method name of a control call, matching its dispatch name on the visor.
pub fn method_name(call: &Call) -> &'static str {
    match call {
        Call::Dial { .. } => "Dial",
        Call::Listen { .. } => "Listen",
        Call::Accept { .. } => "Accept",
        Call::CloseListener { .. } => "CloseListener",
        Call::CloseConn { .. } => "CloseConn",
        Call::Read { .. } => "Read",
        Call::Write { .. } => "Write",
    }
}

#[cfg(test)]
mod tests {
    use super::{format_addr, method_name};
    use crate::appnet::{Addr, NetworkType, PubKey};
    use crate::protocol::Call;

    #[test]
    fn addr_format_includes_network() {
        let addr = Addr::new(NetworkType::Dmsg, PubKey::NULL, 7);
        assert_eq!(format_addr(&addr), format!("dmsg/{}:7", PubKey::NULL));
    }

    #[test]
    fn method_names_match_dispatch_names() {
        assert_eq!(method_name(&Call::Accept { lis_id: 1 }), "Accept");
        assert_eq!(method_name(&Call::CloseConn { conn_id: 1 }), "CloseConn");
    }
}
