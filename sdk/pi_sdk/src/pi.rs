//! Binary layouts and well-known identifiers from the Platform Initialization specification.
//!
//! Layouts are `#[repr(C)]` structures read and written with `scroll` in little-endian order. GUID fields are kept
//! as raw `[u8; 16]` arrays so that a structure can be parsed straight out of flash; each structure offers an
//! accessor returning the [`efi::Guid`](r_efi::efi::Guid).
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
pub mod capsule;
pub mod ftw;
pub mod fw_fs;
pub mod guids;
pub mod hob;
pub mod variable;

/// Boot mode reported in the PHIT HOB.
pub type BootMode = u32;

pub mod boot_mode {
    use super::BootMode;

    pub const BOOT_WITH_FULL_CONFIGURATION: BootMode = 0x00;
    pub const BOOT_WITH_MINIMAL_CONFIGURATION: BootMode = 0x01;
    pub const BOOT_ASSUMING_NO_CONFIGURATION_CHANGES: BootMode = 0x02;
    pub const BOOT_WITH_FULL_CONFIGURATION_PLUS_DIAGNOSTICS: BootMode = 0x03;
    pub const BOOT_WITH_DEFAULT_SETTINGS: BootMode = 0x04;
    pub const BOOT_ON_S4_RESUME: BootMode = 0x05;
    pub const BOOT_ON_S5_RESUME: BootMode = 0x06;
    pub const BOOT_WITH_MFG_MODE_SETTINGS: BootMode = 0x07;
    pub const BOOT_ON_S2_RESUME: BootMode = 0x10;
    pub const BOOT_ON_S3_RESUME: BootMode = 0x11;
    pub const BOOT_ON_FLASH_UPDATE: BootMode = 0x12;
    pub const BOOT_IN_RECOVERY_MODE: BootMode = 0x20;
}

/// Sums `data` as bytes, wrapping. FFS header and file checksums are valid when this is zero.
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, value| sum.wrapping_add(*value))
}

/// Sums `data` as little-endian 16-bit words, wrapping. A trailing odd byte is ignored.
pub fn sum16(data: &[u8]) -> u16 {
    data.chunks_exact(2).fold(0u16, |sum, pair| sum.wrapping_add(u16::from_le_bytes([pair[0], pair[1]])))
}
