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

//! Publishing a virtual socket into its owner registry.
//!
//! A socket is reachable through the registry (and therefore closeable from another
//! task) before its release handle exists. The slot lock is taken before the socket
//! is published and dropped only once the release handle is stored, so a close that
//! arrives in between waits instead of observing an empty slot.

use crate::error::RegistryError;
use crate::id_registry::{IdRegistry, Release};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Release handle of one virtual socket, assigned exactly once.
#[derive(Default)]
pub(crate) struct ReleaseSlot {
    release: Mutex<Option<Release>>,
}

impl ReleaseSlot {
    /// Frees the registry entry. Waits for an in-progress registration to finish.
    pub(crate) async fn release(&self) {
        let slot = self.release.lock().await;
        if let Some(release) = slot.as_ref() {
            release.release();
        }
    }

    #[cfg(test)]
    pub(crate) async fn is_assigned(&self) -> bool {
        self.release.lock().await.is_some()
    }
}

pub(crate) trait Registrable: Send + Sync + 'static {
    fn release_slot(&self) -> &ReleaseSlot;
}

/// Adds `value` under `handle` and stores the returned release in the value's slot.
pub(crate) async fn register<T>(
    registry: &IdRegistry<Arc<T>>,
    handle: u16,
    value: &Arc<T>,
) -> Result<(), RegistryError>
where
    T: Registrable,
{
    let mut slot = value.release_slot().release.lock().await;
    let release = registry.add(handle, value.clone())?;
    *slot = Some(release);
    Ok(())
}
