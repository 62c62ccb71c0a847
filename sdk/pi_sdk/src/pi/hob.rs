//! HOB record layouts.
//!
//! Each payload structure here follows the 8-byte [`Header`] of its record.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use r_efi::efi;
use scroll::{Pread, Pwrite, SizeWith};

use super::BootMode;

pub const HANDOFF: u16 = 0x0001;
pub const MEMORY_ALLOCATION: u16 = 0x0002;
pub const RESOURCE_DESCRIPTOR: u16 = 0x0003;
pub const GUID_EXTENSION: u16 = 0x0004;
pub const FV: u16 = 0x0005;
pub const CPU: u16 = 0x0006;
pub const MEMORY_POOL: u16 = 0x0007;
pub const FV2: u16 = 0x0009;
pub const UEFI_CAPSULE: u16 = 0x000B;
pub const FV3: u16 = 0x000C;
pub const UNUSED: u16 = 0xFFFE;
pub const END_OF_HOB_LIST: u16 = 0xFFFF;

/// PHIT version written by this implementation.
pub const HOB_HANDOFF_TABLE_VERSION: u32 = 0x0009;

/// `EFI_HOB_GENERIC_HEADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct Header {
    pub r#type: u16,
    /// Length of the whole record, header included.
    pub length: u16,
    pub reserved: u32,
}

impl Header {
    pub const SIZE: usize = 8;
}

/// `EFI_HOB_HANDOFF_INFO_TABLE` payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct PhaseHandoffInfoTable {
    pub version: u32,
    pub boot_mode: BootMode,
    pub memory_top: u64,
    pub memory_bottom: u64,
    pub free_memory_top: u64,
    pub free_memory_bottom: u64,
    /// Address of the end-of-list record.
    pub end_of_hob_list: u64,
}

impl PhaseHandoffInfoTable {
    pub const SIZE: usize = 48;
}

/// `EFI_HOB_MEMORY_ALLOCATION` payload (the allocation descriptor).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct MemoryAllocation {
    pub name: [u8; 16],
    pub memory_base_address: u64,
    pub memory_length: u64,
    pub memory_type: u32,
    pub reserved: [u8; 4],
}

impl MemoryAllocation {
    pub const SIZE: usize = 40;

    pub fn name(&self) -> efi::Guid {
        efi::Guid::from_bytes(&self.name)
    }
}

/// Resource types of a [`ResourceDescriptor`].
pub mod resource_type {
    pub const SYSTEM_MEMORY: u32 = 0x00;
    pub const MEMORY_MAPPED_IO: u32 = 0x01;
    pub const IO: u32 = 0x02;
    pub const FIRMWARE_DEVICE: u32 = 0x03;
    pub const MEMORY_MAPPED_IO_PORT: u32 = 0x04;
    pub const MEMORY_RESERVED: u32 = 0x05;
    pub const IO_RESERVED: u32 = 0x06;
}

bitflags::bitflags! {
    /// `EFI_RESOURCE_ATTRIBUTE_TYPE`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceAttributes: u32 {
        const PRESENT = 0x0000_0001;
        const INITIALIZED = 0x0000_0002;
        const TESTED = 0x0000_0004;
        const UNCACHEABLE = 0x0000_0400;
        const WRITE_COMBINEABLE = 0x0000_0800;
        const WRITE_THROUGH_CACHEABLE = 0x0000_1000;
        const WRITE_BACK_CACHEABLE = 0x0000_2000;
    }
}

/// `EFI_HOB_RESOURCE_DESCRIPTOR` payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct ResourceDescriptor {
    pub owner: [u8; 16],
    pub resource_type: u32,
    pub resource_attribute: u32,
    pub physical_start: u64,
    pub resource_length: u64,
}

impl ResourceDescriptor {
    pub const SIZE: usize = 40;

    pub fn attributes(&self) -> ResourceAttributes {
        ResourceAttributes::from_bits_retain(self.resource_attribute)
    }
}

/// `EFI_HOB_FIRMWARE_VOLUME` payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct FirmwareVolume {
    pub base_address: u64,
    pub length: u64,
}

impl FirmwareVolume {
    pub const SIZE: usize = 16;
}

/// `EFI_HOB_FIRMWARE_VOLUME2` payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct FirmwareVolume2 {
    pub base_address: u64,
    pub length: u64,
    pub fv_name: [u8; 16],
    pub file_name: [u8; 16],
}

impl FirmwareVolume2 {
    pub const SIZE: usize = 48;
}

/// `EFI_HOB_CPU` payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct Cpu {
    pub size_of_memory_space: u8,
    pub size_of_io_space: u8,
    pub reserved: [u8; 6],
}

impl Cpu {
    pub const SIZE: usize = 8;
}

/// `EFI_HOB_UEFI_CAPSULE` payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct UefiCapsule {
    pub base_address: u64,
    pub length: u64,
}

impl UefiCapsule {
    pub const SIZE: usize = 16;
}
