//! GUID-keyed interface database shared by the PPI and protocol services.
//!
//! Interfaces are kept in installation order. Notifications are kept in registration order, and installing (or
//! reinstalling) an interface returns the notifications registered for its GUID in that order. The database does
//! not call them itself: the owning services table runs them once it is free to hand itself out as `&mut C`.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{sync::Arc, vec::Vec};
use core::{any::Any, fmt};

use pi_internal_depex::GuidSet;
use pi_sdk::{error::EfiError, guid_fmt};
use r_efi::efi;

/// An installed interface.
pub type Interface = Arc<dyn Any + Send + Sync>;

/// Called with the services table, the GUID, and the interface that was installed.
pub type InterfaceNotify<C> = Arc<dyn Fn(&mut C, &efi::Guid, &Interface) + Send + Sync>;

/// Identifies a notification registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NotifyId(usize);

struct Registration<C> {
    id: NotifyId,
    guid: efi::Guid,
    notify: InterfaceNotify<C>,
}

pub struct InterfaceDb<C> {
    kind: &'static str,
    interfaces: Vec<(efi::Guid, Interface)>,
    notifications: Vec<Registration<C>>,
    next_id: usize,
}

impl<C> InterfaceDb<C> {
    /// An empty database. `kind` names the interfaces in log messages ("PPI", "protocol").
    pub const fn new(kind: &'static str) -> Self {
        Self { kind, interfaces: Vec::new(), notifications: Vec::new(), next_id: 1 }
    }

    fn position(&self, guid: &efi::Guid) -> Option<usize> {
        self.interfaces.iter().position(|(installed, _)| installed == guid)
    }

    fn notifications_for(&self, guid: &efi::Guid) -> Vec<InterfaceNotify<C>> {
        self.notifications.iter().filter(|reg| reg.guid == *guid).map(|reg| Arc::clone(&reg.notify)).collect()
    }

    /// Install `interface` under `guid`.
    ///
    /// Fails with [`EfiError::InvalidParameter`] if `guid` is already installed.
    pub fn install(&mut self, guid: efi::Guid, interface: Interface) -> Result<Vec<InterfaceNotify<C>>, EfiError> {
        if self.position(&guid).is_some() {
            log::warn!(target: "pi_registry", "{} {} is already installed", self.kind, guid_fmt!(guid));
            return Err(EfiError::InvalidParameter);
        }
        self.interfaces.push((guid, interface));
        log::debug!(target: "pi_registry", "installed {} {}", self.kind, guid_fmt!(guid));
        Ok(self.notifications_for(&guid))
    }

    /// Replace the interface installed under `guid`, keeping its position.
    pub fn reinstall(&mut self, guid: efi::Guid, interface: Interface) -> Result<Vec<InterfaceNotify<C>>, EfiError> {
        let index = self.position(&guid).ok_or(EfiError::NotFound)?;
        self.interfaces[index].1 = interface;
        log::debug!(target: "pi_registry", "reinstalled {} {}", self.kind, guid_fmt!(guid));
        Ok(self.notifications_for(&guid))
    }

    pub fn uninstall(&mut self, guid: &efi::Guid) -> Result<Interface, EfiError> {
        let index = self.position(guid).ok_or(EfiError::NotFound)?;
        log::debug!(target: "pi_registry", "uninstalled {} {}", self.kind, guid_fmt!(guid));
        Ok(self.interfaces.remove(index).1)
    }

    /// The interface installed under `guid`. A missing interface is [`EfiError::NotFound`].
    pub fn locate(&self, guid: &efi::Guid) -> Result<Interface, EfiError> {
        self.interfaces
            .iter()
            .find(|(installed, _)| installed == guid)
            .map(|(_, interface)| Arc::clone(interface))
            .ok_or(EfiError::NotFound)
    }

    /// [`locate`](Self::locate) and downcast. A type mismatch is [`EfiError::InvalidParameter`].
    pub fn locate_as<T: Any + Send + Sync>(&self, guid: &efi::Guid) -> Result<Arc<T>, EfiError> {
        self.locate(guid)?.downcast::<T>().map_err(|_| {
            log::error!(target: "pi_registry", "{} {} is not of the requested type", self.kind, guid_fmt!(guid));
            EfiError::InvalidParameter
        })
    }

    pub fn is_installed(&self, guid: &efi::Guid) -> bool {
        self.position(guid).is_some()
    }

    /// Installed GUIDs in installation order.
    pub fn installed(&self) -> impl Iterator<Item = &efi::Guid> {
        self.interfaces.iter().map(|(guid, _)| guid)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn register_notify(&mut self, guid: efi::Guid, notify: InterfaceNotify<C>) -> NotifyId {
        let id = NotifyId(self.next_id);
        self.next_id += 1;
        self.notifications.push(Registration { id, guid, notify });
        id
    }

    pub fn unregister_notify(&mut self, id: NotifyId) -> Result<(), EfiError> {
        let index = self.notifications.iter().position(|reg| reg.id == id).ok_or(EfiError::NotFound)?;
        self.notifications.remove(index);
        Ok(())
    }
}

impl<C> GuidSet for InterfaceDb<C> {
    fn contains_guid(&self, guid: &efi::Guid) -> bool {
        self.is_installed(guid)
    }
}

impl<C> fmt::Debug for InterfaceDb<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceDb")
            .field("kind", &self.kind)
            .field("installed", &self.installed().map(|guid| guid_fmt!(guid)).collect::<Vec<_>>())
            .field("notifications", &self.notifications.len())
            .finish()
    }
}
