//! Variable store layouts.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use r_efi::efi;
use scroll::{Pread, Pwrite, SizeWith};

/// `gEfiVariableGuid`: store of non-authenticated variables.
pub const VARIABLE_GUID: efi::Guid =
    efi::Guid::from_fields(0xddcf3616, 0x3275, 0x4164, 0x98, 0xb6, &[0xfe, 0x85, 0x70, 0x7f, 0xfe, 0x7d]);

/// `gEfiAuthenticatedVariableGuid`
pub const AUTHENTICATED_VARIABLE_GUID: efi::Guid =
    efi::Guid::from_fields(0xaaf32c78, 0x947b, 0x439a, 0xa1, 0x80, &[0x2e, 0x14, 0x4e, 0xc3, 0x77, 0x92]);

pub const VARIABLE_STORE_FORMATTED: u8 = 0x5A;
pub const VARIABLE_STORE_HEALTHY: u8 = 0xFE;
pub const VARIABLE_DATA: u16 = 0x55AA;
/// Variables start on this boundary within the store.
pub const HEADER_ALIGNMENT: usize = 4;

/// Variable `state` values. Each transition only clears bits.
pub mod state {
    pub const VAR_IN_DELETED_TRANSITION: u8 = 0xFE;
    pub const VAR_DELETED: u8 = 0xFD;
    pub const VAR_HEADER_VALID_ONLY: u8 = 0x7F;
    pub const VAR_ADDED: u8 = 0x3F;
}

/// `EFI_VARIABLE_*` attribute bits.
pub mod attributes {
    pub const NON_VOLATILE: u32 = 0x0000_0001;
    pub const BOOTSERVICE_ACCESS: u32 = 0x0000_0002;
    pub const RUNTIME_ACCESS: u32 = 0x0000_0004;
    pub const HARDWARE_ERROR_RECORD: u32 = 0x0000_0008;
    pub const TIME_BASED_AUTHENTICATED_WRITE_ACCESS: u32 = 0x0000_0020;
    pub const APPEND_WRITE: u32 = 0x0000_0040;
}

/// `VARIABLE_STORE_HEADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct VariableStoreHeader {
    pub signature: [u8; 16],
    pub size: u32,
    pub format: u8,
    pub state: u8,
    pub reserved: u16,
    pub reserved1: u32,
}

impl VariableStoreHeader {
    pub const SIZE: usize = 28;

    pub fn signature(&self) -> efi::Guid {
        efi::Guid::from_bytes(&self.signature)
    }
}

/// `VARIABLE_HEADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct VariableHeader {
    pub start_id: u16,
    pub state: u8,
    pub reserved: u8,
    pub attributes: u32,
    pub name_size: u32,
    pub data_size: u32,
    pub vendor_guid: [u8; 16],
}

impl VariableHeader {
    pub const SIZE: usize = 32;
    pub const STATE_OFFSET: usize = 2;

    pub fn vendor_guid(&self) -> efi::Guid {
        efi::Guid::from_bytes(&self.vendor_guid)
    }
}
