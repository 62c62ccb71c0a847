//! Named spin lock.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt;

/// Guards data shared between processors at a rendezvous point.
///
/// The name shows up in the `Debug` output and in the panic message of [`SpinLock::lock_exclusive`].
pub struct SpinLock<T: ?Sized> {
    name: &'static str,
    inner: spin::Mutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self { name, inner: spin::Mutex::new(data) }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Spin until the lock is free.
    pub fn lock(&self) -> spin::MutexGuard<'_, T> {
        self.inner.lock()
    }

    pub fn try_lock(&self) -> Option<spin::MutexGuard<'_, T>> {
        self.inner.try_lock()
    }

    /// Lock for a section that must never contend. Re-entrance panics.
    pub fn lock_exclusive(&self) -> spin::MutexGuard<'_, T> {
        self.inner.try_lock().unwrap_or_else(|| panic!("Re-entrant lock of {:?} not permitted.", self.name))
    }

    /// Run `f` with the lock held.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => write!(f, "SpinLock({}) {{ data: {:?} }}", self.name, &*guard),
            None => write!(f, "SpinLock({}) {{ <locked> }}", self.name),
        }
    }
}
