//! Runtime service capabilities shared between the boot core and platform components.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{string::String, vec::Vec};

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use r_efi::efi;

use crate::error::Result;

/// Backing store behind `GetVariable` / `SetVariable`.
///
/// Names are handled as Rust strings; a store converts them to its on-media encoding.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait VariableStorage {
    /// Attributes and data of the variable `name` owned by `vendor`.
    fn get_variable(&self, name: &str, vendor: &efi::Guid) -> Result<(u32, Vec<u8>)>;

    /// Create or replace a variable. Empty `data` deletes it.
    fn set_variable(&mut self, name: &str, vendor: &efi::Guid, attributes: u32, data: &[u8]) -> Result<()>;

    /// Names of every live variable, in store order.
    fn variable_names(&self) -> Result<Vec<(String, efi::Guid)>>;
}

/// A store that holds nothing and accepts nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullVariableStorage;

impl VariableStorage for NullVariableStorage {
    fn get_variable(&self, _name: &str, _vendor: &efi::Guid) -> Result<(u32, Vec<u8>)> {
        Err(crate::error::EfiError::NotFound)
    }

    fn set_variable(&mut self, _name: &str, _vendor: &efi::Guid, _attributes: u32, _data: &[u8]) -> Result<()> {
        Err(crate::error::EfiError::Unsupported)
    }

    fn variable_names(&self) -> Result<Vec<(String, efi::Guid)>> {
        Ok(Vec::new())
    }
}
