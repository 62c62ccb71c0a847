//! Fault tolerant write working block layouts.
//!
//! State bits in these structures are programmed from the erased value (1) to 0 as an operation progresses, so a
//! power loss at any point leaves a state that names the last completed step.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use r_efi::efi;
use scroll::{Pread, Pwrite, SizeWith};

/// `gEdkiiWorkingBlockSignatureGuid`
pub const WORKING_BLOCK_SIGNATURE_GUID: efi::Guid =
    efi::Guid::from_fields(0x9e58292b, 0x7c68, 0x497d, 0xa0, 0xce, &[0x65, 0x00, 0xfd, 0x9f, 0x1b, 0x95]);

pub const ERASED_BYTE: u8 = 0xFF;

/// Working block `state` bits.
pub mod working_block_state {
    /// Cleared once the header is written and valid.
    pub const VALID: u8 = 0x01;
    /// Cleared when the working block is retired.
    pub const INVALID: u8 = 0x02;
}

/// Write header `state` bits.
pub mod write_header_state {
    pub const HEADER_ALLOCATED: u8 = 0x01;
    pub const WRITES_ALLOCATED: u8 = 0x02;
    pub const COMPLETE: u8 = 0x04;
}

/// Write record `state` bits.
pub mod write_record_state {
    pub const BOOT_BLOCK_UPDATED: u8 = 0x01;
    pub const SPARE_COMPLETE: u8 = 0x02;
    pub const DESTINATION_COMPLETE: u8 = 0x04;
}

/// `EFI_FAULT_TOLERANT_WORKING_BLOCK_HEADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct WorkingBlockHeader {
    pub signature: [u8; 16],
    pub crc: u32,
    /// `WorkingBlockValid:1`, `WorkingBlockInvalid:1`, six reserved bits.
    pub state: u8,
    pub reserved: [u8; 3],
    pub write_queue_size: u64,
}

impl WorkingBlockHeader {
    pub const SIZE: usize = 32;
    pub const CRC_OFFSET: usize = 16;
    pub const STATE_OFFSET: usize = 20;

    pub fn signature(&self) -> efi::Guid {
        efi::Guid::from_bytes(&self.signature)
    }
}

/// `EFI_FAULT_TOLERANT_WRITE_HEADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct WriteHeader {
    pub state: u8,
    pub reserved: [u8; 3],
    pub caller_id: [u8; 16],
    pub reserved2: [u8; 4],
    pub number_of_writes: u64,
    pub private_data_size: u64,
}

impl WriteHeader {
    pub const SIZE: usize = 40;

    pub fn caller_id(&self) -> efi::Guid {
        efi::Guid::from_bytes(&self.caller_id)
    }
}

/// `EFI_FAULT_TOLERANT_WRITE_RECORD`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct WriteRecord {
    pub state: u8,
    pub reserved: [u8; 7],
    pub index: u64,
    pub lba: u64,
    pub offset: u64,
    pub length: u64,
    pub relative_offset: i64,
}

impl WriteRecord {
    pub const SIZE: usize = 48;
}
