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

//! Broadcast flags and drain tracking built on `tokio::sync::watch`.

use std::sync::Arc;
use tokio::sync::watch;

/// Resolves once the flag behind `flag` is `true` or its sender is gone.
///
/// A flag raised before the receiver was created is observed immediately.
pub(crate) async fn wait_until_set(flag: &mut watch::Receiver<bool>) {
    loop {
        if *flag.borrow_and_update() {
            return;
        }
        if flag.changed().await.is_err() {
            return;
        }
    }
}

/// Counts outstanding tasks and lets a closer wait until all of them finished.
#[derive(Clone)]
pub(crate) struct WaitGroup {
    count: Arc<watch::Sender<usize>>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    pub(crate) fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }

    /// Registers one task. The task counts as done when the guard is dropped.
    pub(crate) fn add(&self) -> WaitGuard {
        self.count.send_modify(|count| *count += 1);
        WaitGuard {
            count: self.count.clone(),
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        *self.count.borrow()
    }

    pub(crate) async fn wait(&self) {
        let mut count = self.count.subscribe();
        loop {
            if *count.borrow_and_update() == 0 {
                return;
            }
            if count.changed().await.is_err() {
                return;
            }
        }
    }
}

pub(crate) struct WaitGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }
}
