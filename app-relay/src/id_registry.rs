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

//! Handle registry mapping 16-bit IDs to live virtual sockets.
//!
//! The registry is an arena of local proxies: the handle is the index, the proxied
//! resource itself lives on the other side of the control channel. Entries carry a
//! generation marker so a [`Release`] obtained for one occupant of a handle never
//! frees a later occupant of the same handle.

use crate::error::RegistryError;
use crate::observability::events;
use std::collections::HashMap;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::trace;

const COMPONENT: &str = "id_registry";

enum Slot<T> {
    Reserved { generation: u64 },
    Live { generation: u64, value: T },
}

impl<T> Slot<T> {
    fn generation(&self) -> u64 {
        match self {
            Slot::Reserved { generation } | Slot::Live { generation, .. } => *generation,
        }
    }
}

struct Entries<T> {
    slots: HashMap<u16, Slot<T>>,
    last_handle: u16,
    next_generation: u64,
}

impl<T> Entries<T> {
    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn remove_generation(&mut self, handle: u16, generation: u64) -> bool {
        match self.slots.get(&handle) {
            Some(slot) if slot.generation() == generation => {
                self.slots.remove(&handle);
                true
            }
            _ => false,
        }
    }
}

type Shared<T> = Arc<Mutex<Entries<T>>>;

fn lock<T>(entries: &Mutex<Entries<T>>) -> MutexGuard<'_, Entries<T>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe registry of handles owned by one facade, listener or gateway.
pub struct IdRegistry<T> {
    entries: Shared<T>,
}

impl<T> Default for IdRegistry<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IdRegistry<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                slots: HashMap::new(),
                last_handle: 0,
                next_generation: 0,
            })),
        }
    }

    /// Registers `value` under `handle`. Fails without replacing anything when the
    /// handle is already taken, live or reserved.
    pub fn add(&self, handle: u16, value: T) -> Result<Release, RegistryError> {
        let generation = {
            let mut entries = lock(&self.entries);
            if entries.slots.contains_key(&handle) {
                return Err(RegistryError::DuplicateHandle(handle));
            }
            let generation = entries.bump_generation();
            entries.slots.insert(handle, Slot::Live { generation, value });
            generation
        };

        trace!(
            event = events::REGISTRY_ADD,
            component = COMPONENT,
            handle,
            generation,
            "handle registered"
        );
        Ok(self.release_for(handle, generation))
    }

    /// Reserves the next free handle, searching upward from the last one handed out.
    pub fn reserve_next(&self) -> Result<Reservation<T>, RegistryError> {
        let mut entries = lock(&self.entries);

        let mut candidate = entries.last_handle;
        for _ in 0..u16::MAX {
            candidate = candidate.wrapping_add(1);
            if candidate == 0 {
                candidate = 1;
            }
            if entries.slots.contains_key(&candidate) {
                continue;
            }

            let generation = entries.bump_generation();
            entries
                .slots
                .insert(candidate, Slot::Reserved { generation });
            entries.last_handle = candidate;

            return Ok(Reservation {
                entries: Arc::downgrade(&self.entries),
                handle: candidate,
                generation,
                committed: false,
            });
        }

        Err(RegistryError::NoFreeHandle)
    }

    /// Looks up a live handle. Reserved handles are not visible.
    pub fn get(&self, handle: u16) -> Option<T> {
        match lock(&self.entries).slots.get(&handle) {
            Some(Slot::Live { value, .. }) => Some(value.clone()),
            _ => None,
        }
    }

    /// Removes a handle regardless of generation; returns the value if it was live.
    pub fn remove(&self, handle: u16) -> Option<T> {
        match lock(&self.entries).slots.remove(&handle) {
            Some(Slot::Live { value, .. }) => Some(value),
            _ => None,
        }
    }

    /// Visits a snapshot of live entries until `visit` returns `false`.
    ///
    /// The lock is not held while visiting, so `visit` may close the resource and
    /// thereby remove it (or any other entry) from this registry.
    pub fn range<F>(&self, mut visit: F)
    where
        F: FnMut(u16, &T) -> bool,
    {
        let snapshot: Vec<(u16, T)> = {
            let entries = lock(&self.entries);
            let mut live: Vec<(u16, T)> = entries
                .slots
                .iter()
                .filter_map(|(handle, slot)| match slot {
                    Slot::Live { value, .. } => Some((*handle, value.clone())),
                    Slot::Reserved { .. } => None,
                })
                .collect();
            live.sort_by_key(|(handle, _)| *handle);
            live
        };

        for (handle, value) in &snapshot {
            if !visit(*handle, value) {
                break;
            }
        }
    }

    /// Collects a snapshot of live values in handle order.
    pub fn values(&self) -> Vec<T> {
        let mut values = Vec::new();
        self.range(|_, value| {
            values.push(value.clone());
            true
        });
        values
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        lock(&self.entries)
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Live { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release_for(&self, handle: u16, generation: u64) -> Release {
        let entries = Arc::downgrade(&self.entries);
        Release::new(handle, move || {
            let Some(entries) = entries.upgrade() else {
                return;
            };
            let removed = lock(&entries).remove_generation(handle, generation);
            trace!(
                event = events::REGISTRY_RELEASE,
                component = COMPONENT,
                handle,
                generation,
                removed,
                "handle released"
            );
        })
    }
}

/// A handle held by [`IdRegistry::reserve_next`] but not yet bound to a value.
///
/// Dropping an uncommitted reservation frees the handle again.
pub struct Reservation<T> {
    entries: Weak<Mutex<Entries<T>>>,
    handle: u16,
    generation: u64,
    committed: bool,
}

impl<T> Reservation<T>
where
    T: Clone + Send + 'static,
{
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// Binds `value` to the reserved handle and returns its release.
    pub fn commit(mut self, value: T) -> Release {
        self.committed = true;
        let handle = self.handle;
        let generation = self.generation;

        if let Some(entries) = self.entries.upgrade() {
            let mut guard = lock(&entries);
            if matches!(guard.slots.get(&handle), Some(slot) if slot.generation() == generation)
            {
                guard.slots.insert(handle, Slot::Live { generation, value });
            }
        }

        let entries = self.entries.clone();
        Release::new(handle, move || {
            if let Some(entries) = entries.upgrade() {
                lock(&entries).remove_generation(handle, generation);
            }
        })
    }
}

impl<T> Drop for Reservation<T> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(entries) = self.entries.upgrade() {
            lock(&entries).remove_generation(self.handle, self.generation);
        }
    }
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Removes one registry entry. Calling [`Release::release`] more than once is a no-op.
pub struct Release {
    handle: u16,
    free: Mutex<Option<ReleaseFn>>,
}

impl Release {
    fn new(handle: u16, free: impl FnOnce() + Send + 'static) -> Self {
        Self {
            handle,
            free: Mutex::new(Some(Box::new(free))),
        }
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn release(&self) {
        let free = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(free) = free {
            free();
        }
    }
}

impl Debug for Release {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Release")
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::IdRegistry;
    use crate::error::RegistryError;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn add_rejects_duplicate_without_replacing() {
        let registry = IdRegistry::new();

        let _release = registry.add(1, "first").expect("first add");
        assert_eq!(
            registry.add(1, "second").unwrap_err(),
            RegistryError::DuplicateHandle(1)
        );
        assert_eq!(registry.get(1), Some("first"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let registry = IdRegistry::new();
        let release = registry.add(3, 30u32).expect("add");

        release.release();
        release.release();

        assert_eq!(registry.get(3), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn stale_release_does_not_free_reused_handle() {
        let registry = IdRegistry::new();
        let stale = registry.add(5, "old").expect("add old");
        registry.remove(5);
        let _current = registry.add(5, "new").expect("add new");

        stale.release();

        assert_eq!(registry.get(5), Some("new"));
    }

    #[test]
    fn reserve_next_hands_out_unique_handles() {
        let registry: IdRegistry<u16> = IdRegistry::new();
        let mut seen = HashSet::new();
        let mut releases = Vec::new();

        for _ in 0..64 {
            let reservation = registry.reserve_next().expect("free handle");
            let handle = reservation.handle();
            assert_ne!(handle, 0);
            assert!(seen.insert(handle));
            releases.push(reservation.commit(handle));
        }

        assert_eq!(registry.len(), 64);
        assert!(registry.add(1, 1).is_err());
    }

    #[test]
    fn reserve_next_skips_live_handles_and_reports_exhaustion() {
        let registry: IdRegistry<()> = IdRegistry::new();
        let _two = registry.add(2, ()).expect("add 2");

        let first = registry.reserve_next().expect("handle 1");
        let second = registry.reserve_next().expect("handle 3");
        assert_eq!(first.handle(), 1);
        assert_eq!(second.handle(), 3);

        let mut keep = vec![first.commit(()), second.commit(())];
        while let Ok(reservation) = registry.reserve_next() {
            keep.push(reservation.commit(()));
        }

        assert_eq!(registry.len(), usize::from(u16::MAX));
        assert_eq!(
            registry.reserve_next().err(),
            Some(RegistryError::NoFreeHandle)
        );
    }

    #[test]
    fn dropped_reservation_frees_the_handle() {
        let registry: IdRegistry<()> = IdRegistry::new();
        let reservation = registry.reserve_next().expect("reserve");
        let handle = reservation.handle();

        assert!(registry.add(handle, ()).is_err());
        assert_eq!(registry.get(handle), None);
        drop(reservation);

        assert!(registry.add(handle, ()).is_ok());
    }

    #[test]
    fn range_tolerates_removal_from_visitor() {
        let registry = Arc::new(IdRegistry::new());
        let releases: Vec<_> = (1..=4u16)
            .map(|handle| registry.add(handle, handle).expect("add"))
            .collect();

        let mut visited = Vec::new();
        registry.range(|handle, _| {
            visited.push(handle);
            // closing one entry from inside the visit removes every entry
            for release in &releases {
                release.release();
            }
            true
        });

        assert_eq!(visited, vec![1, 2, 3, 4]);
        assert!(registry.is_empty());
    }

    #[test]
    fn range_stops_when_visitor_returns_false() {
        let registry = IdRegistry::new();
        let _releases: Vec<_> = (1..=3u16)
            .map(|handle| registry.add(handle, ()).expect("add"))
            .collect();

        let mut count = 0;
        registry.range(|_, _| {
            count += 1;
            false
        });

        assert_eq!(count, 1);
    }

    #[test]
    fn release_after_registry_dropped_is_harmless() {
        let registry = IdRegistry::new();
        let release = registry.add(9, ()).expect("add");
        drop(registry);

        release.release();
    }
}
