//! Capsule header layout.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use r_efi::efi;
use scroll::{Pread, Pwrite, SizeWith};

/// `gEfiCapsuleVendorGuid`: names capsule GUID HOBs.
pub const CAPSULE_VENDOR_GUID: efi::Guid =
    efi::Guid::from_fields(0x711c703f, 0xc285, 0x4b10, 0xa3, 0xb0, &[0x36, 0xec, 0xbd, 0x3c, 0x8b, 0xe2]);

bitflags::bitflags! {
    /// `CAPSULE_FLAGS_*`. The low 16 bits are capsule specific.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapsuleFlags: u32 {
        const PERSIST_ACROSS_RESET = 0x0001_0000;
        const POPULATE_SYSTEM_TABLE = 0x0002_0000;
        const INITIATE_RESET = 0x0004_0000;
        const _ = 0x0000_FFFF;
    }
}

/// `EFI_CAPSULE_HEADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct CapsuleHeader {
    pub capsule_guid: [u8; 16],
    pub header_size: u32,
    pub flags: u32,
    pub capsule_image_size: u32,
}

impl CapsuleHeader {
    pub const SIZE: usize = 28;

    pub fn capsule_guid(&self) -> efi::Guid {
        efi::Guid::from_bytes(&self.capsule_guid)
    }

    pub fn flags(&self) -> CapsuleFlags {
        CapsuleFlags::from_bits_retain(self.flags)
    }
}
