//! Event groups.
//!
//! Events here only ever belong to a group: signalling the group returns every member's notification in the order
//! the events were created, and the caller runs them against its services table.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{sync::Arc, vec::Vec};
use core::fmt;

use pi_sdk::{error::EfiError, guid_fmt};
use r_efi::efi;

/// Called with the services table and the group that was signalled.
pub type EventNotify<C> = Arc<dyn Fn(&mut C, &efi::Guid) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventId(usize);

struct Event<C> {
    id: EventId,
    group: efi::Guid,
    notify: EventNotify<C>,
}

pub struct EventGroups<C> {
    events: Vec<Event<C>>,
    next_id: usize,
}

impl<C> Default for EventGroups<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> EventGroups<C> {
    pub const fn new() -> Self {
        Self { events: Vec::new(), next_id: 1 }
    }

    /// Create an event in `group`.
    pub fn create_event_ex(&mut self, group: efi::Guid, notify: EventNotify<C>) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.events.push(Event { id, group, notify });
        id
    }

    pub fn close_event(&mut self, id: EventId) -> Result<(), EfiError> {
        let index = self.events.iter().position(|event| event.id == id).ok_or(EfiError::NotFound)?;
        self.events.remove(index);
        Ok(())
    }

    /// Notifications of every event in `group`, in creation order.
    pub fn signal(&self, group: &efi::Guid) -> Vec<EventNotify<C>> {
        let notifies: Vec<_> =
            self.events.iter().filter(|event| event.group == *group).map(|event| Arc::clone(&event.notify)).collect();
        log::debug!(target: "pi_events", "signalling event group {} ({} events)", guid_fmt!(group), notifies.len());
        notifies
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<C> fmt::Debug for EventGroups<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventGroups").field("events", &self.events.len()).finish()
    }
}
