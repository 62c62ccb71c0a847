//! Hand-Off Block (HOB) list builder and walker
//!
//! A HOB list is a contiguous run of 8-byte aligned records in a fixed region. The first record is the Phase Handoff
//! Information Table (PHIT) describing the region, and an end-of-list record terminates it. Records are only ever
//! appended.
//!
//! [`HobList`] owns the region as a byte buffer together with the physical address it models, so every read and
//! write is bounds checked. Moving the list to permanent memory consumes the old handle ([`HobList::relocate`]),
//! leaving nothing that still refers to the old region.
//!
//! ## Example
//!
//! ```rust
//! use pi_internal_hob::{Hob, HobList};
//! use pi_sdk::pi::boot_mode;
//! use r_efi::efi;
//!
//! const CONFIG: efi::Guid =
//!     efi::Guid::from_fields(0x5bd21e1b, 0x9a5e, 0x4d0c, 0x8c, 0x41, &[0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc]);
//!
//! let mut hobs = HobList::new(0x8000_0000, 0x1000, boot_mode::BOOT_WITH_FULL_CONFIGURATION).unwrap();
//! hobs.build_guid_hob(&CONFIG, &0x3f8u64.to_le_bytes()).unwrap();
//!
//! let hob = hobs.get_first_guid_hob(&CONFIG).unwrap();
//! assert_eq!(hob.guid_data().unwrap(), &0x3f8u64.to_le_bytes());
//! assert!(matches!(hobs.iter().next().unwrap().decode(), Hob::Handoff(_)));
//! ```
//!
//! ## Logging
//!
//! Record creation and integrity failures are logged on the `pi_hob` target.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod error;
mod record;

pub use error::HobError;
pub use record::{Hob, HobIter, HobRef};

use alloc::vec::Vec;
use core::fmt;

use pi_sdk::pi::{
    hob::{self, Header, PhaseHandoffInfoTable},
    BootMode,
};
use r_efi::efi;
use scroll::{Pread, Pwrite, LE};

/// Records are aligned to, and sized in multiples of, this boundary.
pub const HOB_ALIGNMENT: usize = 8;

const PHIT_LENGTH: usize = Header::SIZE + PhaseHandoffInfoTable::SIZE;
const END_LENGTH: usize = Header::SIZE;

pub type Result<T> = core::result::Result<T, HobError>;

/// Length of the record holding `payload_size` bytes, header included.
pub fn record_length(payload_size: usize) -> Result<usize> {
    let length = Header::SIZE
        .checked_add(payload_size)
        .and_then(|len| len.checked_next_multiple_of(HOB_ALIGNMENT))
        .ok_or(HobError::RecordTooLarge(payload_size))?;
    if length > u16::MAX as usize {
        return Err(HobError::RecordTooLarge(length));
    }
    Ok(length)
}

/// An owned HOB list.
pub struct HobList {
    base: u64,
    data: Vec<u8>,
    end_offset: usize,
}

impl HobList {
    /// Create a list over a region of `capacity` bytes modelled at physical address `base`.
    ///
    /// Writes the PHIT, describing the whole region, followed by the end marker.
    pub fn new(base: u64, capacity: usize, boot_mode: BootMode) -> Result<Self> {
        let capacity = capacity - capacity % HOB_ALIGNMENT;
        if capacity < PHIT_LENGTH + END_LENGTH {
            return Err(HobError::CapacityTooSmall(capacity));
        }

        let mut list = Self { base, data: alloc::vec![0u8; capacity], end_offset: PHIT_LENGTH };
        let phit = PhaseHandoffInfoTable {
            version: hob::HOB_HANDOFF_TABLE_VERSION,
            boot_mode,
            ..Default::default()
        };
        list.write_header(0, hob::HANDOFF, PHIT_LENGTH);
        list.write_phit(phit);
        list.write_end_marker();
        list.refresh_phit();
        log::debug!(target: "pi_hob", "HOB list created at {base:#x} with {capacity:#x} bytes");
        Ok(list)
    }

    /// Adopt a list produced by another phase.
    ///
    /// The first record must be a PHIT, every record length a non-zero multiple of eight inside `bytes`, and the end
    /// marker must sit where the PHIT says it does.
    pub fn from_bytes(base: u64, mut bytes: Vec<u8>) -> Result<Self> {
        bytes.truncate(bytes.len() - bytes.len() % HOB_ALIGNMENT);

        let first = record::read_record(&bytes, 0).ok_or(HobError::MissingHandoff)?;
        if first.r#type() != hob::HANDOFF || first.length() < PHIT_LENGTH {
            log::error!(target: "pi_hob", "HOB list at {base:#x} does not start with a PHIT");
            return Err(HobError::MissingHandoff);
        }
        let phit: PhaseHandoffInfoTable =
            first.payload().pread_with(0, LE).map_err(|_| HobError::MissingHandoff)?;

        let mut offset = 0;
        let end_offset = loop {
            if offset + Header::SIZE > bytes.len() {
                return Err(HobError::MissingEnd);
            }
            let record = record::read_record(&bytes, offset).ok_or_else(|| {
                log::error!(target: "pi_hob", "corrupt HOB record at {offset:#x}");
                HobError::CorruptRecord { offset }
            })?;
            if record.r#type() == hob::END_OF_HOB_LIST {
                break offset;
            }
            offset += record.length();
        };

        let found = base.checked_add(end_offset as u64).ok_or_else(|| {
            log::error!(target: "pi_hob", "HOB list at {base:#x} wraps the address space");
            HobError::CorruptRecord { offset: end_offset }
        })?;
        if phit.end_of_hob_list != found {
            log::error!(target: "pi_hob", "PHIT end {:#x} disagrees with end marker {found:#x}", phit.end_of_hob_list);
            return Err(HobError::EndMismatch { expected: phit.end_of_hob_list, found });
        }

        Ok(Self { base, data: bytes, end_offset })
    }

    /// Copy the list to a new region and rebase its PHIT.
    ///
    /// The returned list is the only handle; records keep their offsets.
    pub fn relocate(self, new_base: u64, new_capacity: usize) -> Result<HobList> {
        let new_capacity = new_capacity - new_capacity % HOB_ALIGNMENT;
        let used = self.used_size();
        if new_capacity < used {
            log::error!(target: "pi_hob", "cannot relocate {used:#x} bytes of HOBs into {new_capacity:#x}");
            return Err(HobError::OutOfResources { requested: used, available: new_capacity });
        }

        let mut data = self.data;
        data.truncate(used);
        data.resize(new_capacity, 0);
        let mut list = HobList { base: new_base, data, end_offset: self.end_offset };
        list.refresh_phit();
        log::info!(target: "pi_hob", "HOB list relocated from {:#x} to {new_base:#x}", self.base);
        Ok(list)
    }

    /// Append a record of `r#type` with a zeroed `payload_size`-byte payload. Returns the record offset.
    ///
    /// The record comes from the tail of free space and is rounded up to eight bytes. On failure the region is left
    /// untouched.
    pub fn create_hob(&mut self, r#type: u16, payload_size: usize) -> Result<usize> {
        let length = record_length(payload_size)?;
        let available = self.free_size();
        if length > available {
            log::error!(
                target: "pi_hob",
                "out of HOB space: type {:#06x} needs {length:#x} bytes, {available:#x} left",
                r#type
            );
            return Err(HobError::OutOfResources { requested: length, available });
        }

        let offset = self.end_offset;
        self.data[offset..offset + length].fill(0);
        self.write_header(offset, r#type, length);
        self.end_offset += length;
        self.write_end_marker();
        self.refresh_phit();
        log::trace!(target: "pi_hob", "HOB type {:#06x} length {length:#x} at {offset:#x}", r#type);
        Ok(offset)
    }

    /// Append a record with `payload` as its payload.
    pub fn create_hob_with(&mut self, r#type: u16, payload: &[u8]) -> Result<usize> {
        let offset = self.create_hob(r#type, payload.len())?;
        self.payload_mut(offset)?[..payload.len()].copy_from_slice(payload);
        Ok(offset)
    }

    fn create_typed<T>(&mut self, r#type: u16, size: usize, value: T) -> Result<usize>
    where
        T: scroll::ctx::TryIntoCtx<scroll::Endian, Error = scroll::Error>,
    {
        let offset = self.create_hob(r#type, size)?;
        self.payload_mut(offset)?.pwrite_with(value, 0, LE).map_err(|_| HobError::CorruptRecord { offset })?;
        Ok(offset)
    }

    /// Append a GUID extension record carrying `data`.
    pub fn build_guid_hob(&mut self, guid: &efi::Guid, data: &[u8]) -> Result<usize> {
        let offset = self.create_hob(hob::GUID_EXTENSION, 16 + data.len())?;
        let payload = self.payload_mut(offset)?;
        payload[..16].copy_from_slice(guid.as_bytes());
        payload[16..16 + data.len()].copy_from_slice(data);
        Ok(offset)
    }

    /// Append a memory allocation record.
    pub fn build_memory_allocation_hob(
        &mut self,
        name: &efi::Guid,
        base: u64,
        length: u64,
        memory_type: u32,
    ) -> Result<usize> {
        let allocation = hob::MemoryAllocation {
            name: *name.as_bytes(),
            memory_base_address: base,
            memory_length: length,
            memory_type,
            reserved: [0; 4],
        };
        self.create_typed(hob::MEMORY_ALLOCATION, hob::MemoryAllocation::SIZE, allocation)
    }

    /// Append a resource descriptor record.
    pub fn build_resource_descriptor_hob(
        &mut self,
        owner: &efi::Guid,
        resource_type: u32,
        attributes: hob::ResourceAttributes,
        start: u64,
        length: u64,
    ) -> Result<usize> {
        let descriptor = hob::ResourceDescriptor {
            owner: *owner.as_bytes(),
            resource_type,
            resource_attribute: attributes.bits(),
            physical_start: start,
            resource_length: length,
        };
        self.create_typed(hob::RESOURCE_DESCRIPTOR, hob::ResourceDescriptor::SIZE, descriptor)
    }

    /// Append a firmware volume record.
    pub fn build_fv_hob(&mut self, base: u64, length: u64) -> Result<usize> {
        self.create_typed(hob::FV, hob::FirmwareVolume::SIZE, hob::FirmwareVolume { base_address: base, length })
    }

    /// Append a firmware volume record naming the file the volume was extracted from.
    pub fn build_fv2_hob(
        &mut self,
        base: u64,
        length: u64,
        fv_name: &efi::Guid,
        file_name: &efi::Guid,
    ) -> Result<usize> {
        let fv = hob::FirmwareVolume2 {
            base_address: base,
            length,
            fv_name: *fv_name.as_bytes(),
            file_name: *file_name.as_bytes(),
        };
        self.create_typed(hob::FV2, hob::FirmwareVolume2::SIZE, fv)
    }

    /// Append a CPU record.
    pub fn build_cpu_hob(&mut self, size_of_memory_space: u8, size_of_io_space: u8) -> Result<usize> {
        let cpu = hob::Cpu { size_of_memory_space, size_of_io_space, reserved: [0; 6] };
        self.create_typed(hob::CPU, hob::Cpu::SIZE, cpu)
    }

    /// Append a UEFI capsule record.
    pub fn build_capsule_hob(&mut self, base: u64, length: u64) -> Result<usize> {
        self.create_typed(hob::UEFI_CAPSULE, hob::UefiCapsule::SIZE, hob::UefiCapsule { base_address: base, length })
    }

    /// Walk every record from the head, PHIT included, end marker excluded.
    pub fn iter(&self) -> HobIter<'_> {
        HobIter::new(self.as_bytes(), 0)
    }

    /// Walk the records of one type.
    pub fn iter_type(&self, r#type: u16) -> impl Iterator<Item = HobRef<'_>> {
        self.iter().filter(move |hob| hob.r#type() == r#type)
    }

    /// The first record of `r#type` after the record at `after`, or from the head when `after` is `None`.
    pub fn get_next_hob(&self, r#type: u16, after: Option<usize>) -> Option<HobRef<'_>> {
        let start = match after {
            Some(offset) => offset + record::read_record(self.as_bytes(), offset)?.length(),
            None => 0,
        };
        HobIter::new(self.as_bytes(), start).find(|hob| hob.r#type() == r#type)
    }

    /// The first GUID extension record named `guid`.
    pub fn get_first_guid_hob(&self, guid: &efi::Guid) -> Option<HobRef<'_>> {
        self.get_next_guid_hob(guid, None)
    }

    /// The next GUID extension record named `guid` after the record at `after`.
    pub fn get_next_guid_hob(&self, guid: &efi::Guid, after: Option<usize>) -> Option<HobRef<'_>> {
        let mut cursor = after;
        loop {
            let hob = self.get_next_hob(hob::GUID_EXTENSION, cursor)?;
            if hob.guid().as_ref() == Some(guid) {
                return Some(hob);
            }
            cursor = Some(hob.offset());
        }
    }

    /// Every GUID extension record named `guid`, in creation order.
    pub fn guid_hobs<'a>(&'a self, guid: &'a efi::Guid) -> impl Iterator<Item = HobRef<'a>> + 'a {
        self.iter_type(hob::GUID_EXTENSION).filter(move |hob| hob.guid().as_ref() == Some(guid))
    }

    /// The record at `offset`.
    pub fn hob_at(&self, offset: usize) -> Result<HobRef<'_>> {
        if offset >= self.end_offset {
            return Err(HobError::InvalidOffset(offset));
        }
        record::read_record(self.as_bytes(), offset).ok_or(HobError::InvalidOffset(offset))
    }

    /// Mutable payload of the record at `offset`.
    pub fn payload_mut(&mut self, offset: usize) -> Result<&mut [u8]> {
        let length = self.hob_at(offset)?.length();
        Ok(&mut self.data[offset + Header::SIZE..offset + length])
    }

    pub fn phit(&self) -> PhaseHandoffInfoTable {
        // Written by `new` or checked by `from_bytes`; a failed read can only mean an empty region.
        self.data.pread_with(Header::SIZE, LE).unwrap_or_default()
    }

    pub fn boot_mode(&self) -> BootMode {
        self.phit().boot_mode
    }

    pub fn set_boot_mode(&mut self, boot_mode: BootMode) {
        let phit = PhaseHandoffInfoTable { boot_mode, ..self.phit() };
        self.write_phit(phit);
    }

    /// Physical address the region models.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Physical address of the record at `offset`.
    pub fn address_of(&self, offset: usize) -> u64 {
        self.base + offset as u64
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes consumed by the records, end marker included.
    pub fn used_size(&self) -> usize {
        self.end_offset + END_LENGTH
    }

    pub fn free_size(&self) -> usize {
        self.capacity() - self.used_size()
    }

    /// The records, end marker included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.used_size()]
    }

    fn write_header(&mut self, offset: usize, r#type: u16, length: usize) {
        let header = Header { r#type, length: length as u16, reserved: 0 };
        // Callers have reserved `length` bytes at `offset`.
        let written = self.data.pwrite_with(header, offset, LE);
        debug_assert!(written.is_ok(), "HOB header at {offset:#x} is outside the region");
    }

    fn write_end_marker(&mut self) {
        self.write_header(self.end_offset, hob::END_OF_HOB_LIST, END_LENGTH);
    }

    fn write_phit(&mut self, phit: PhaseHandoffInfoTable) {
        let written = self.data.pwrite_with(phit, Header::SIZE, LE);
        debug_assert!(written.is_ok(), "HOB region cannot hold a PHIT");
    }

    fn refresh_phit(&mut self) {
        let top = self.base + self.capacity() as u64;
        let phit = PhaseHandoffInfoTable {
            memory_top: top,
            memory_bottom: self.base,
            free_memory_top: top,
            free_memory_bottom: self.base + self.used_size() as u64,
            end_of_hob_list: self.base + self.end_offset as u64,
            ..self.phit()
        };
        self.write_phit(phit);
    }
}

impl<'a> IntoIterator for &'a HobList {
    type Item = HobRef<'a>;
    type IntoIter = HobIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for HobList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HobList")
            .field("base", &format_args!("{:#x}", self.base))
            .field("capacity", &self.capacity())
            .field("used", &self.used_size())
            .finish()
    }
}

impl fmt::Display for HobList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HOB list at {:#x} ({:#x}/{:#x} bytes used)", self.base, self.used_size(), self.capacity())?;
        for hob in self {
            writeln!(f, "  {:#06x}: {}", hob.offset(), hob.decode())?;
        }
        Ok(())
    }
}

/// GUID used as the name of an allocation record when the allocation has no owner.
pub const UNNAMED_ALLOCATION: efi::Guid = efi::Guid::from_bytes(&[0; 16]);

#[cfg(test)]
mod tests {
    use super::*;
    use pi_sdk::{
        error::EfiError,
        pi::{boot_mode, hob::ResourceAttributes},
    };

    const BASE: u64 = 0x1_0000;
    const GUID_A: efi::Guid =
        efi::Guid::from_fields(0x7ce2af0c, 0x1c4b, 0x4e4a, 0x9f, 0x36, &[0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
    const GUID_B: efi::Guid =
        efi::Guid::from_fields(0x2e0ad8a3, 0x96c4, 0x4b4d, 0x80, 0x11, &[0x61, 0x62, 0x63, 0x64, 0x65, 0x66]);

    fn list(capacity: usize) -> HobList {
        HobList::new(BASE, capacity, boot_mode::BOOT_WITH_FULL_CONFIGURATION).unwrap()
    }

    #[test]
    fn new_list_holds_phit_and_end_marker() {
        let hobs = list(0x1000);
        assert_eq!(hobs.used_size(), PHIT_LENGTH + END_LENGTH);
        let phit = hobs.phit();
        assert_eq!(phit.version, hob::HOB_HANDOFF_TABLE_VERSION);
        assert_eq!(phit.memory_bottom, BASE);
        assert_eq!(phit.memory_top, BASE + 0x1000);
        assert_eq!(phit.end_of_hob_list, BASE + PHIT_LENGTH as u64);
        assert_eq!(phit.free_memory_bottom, BASE + hobs.used_size() as u64);
        assert_eq!(hobs.iter().count(), 1);
    }

    #[test]
    fn capacity_must_hold_phit_and_end() {
        assert_eq!(HobList::new(BASE, 63, 0).unwrap_err(), HobError::CapacityTooSmall(56));
        assert!(HobList::new(BASE, 64, 0).is_ok());
    }

    #[test]
    fn records_round_up_to_eight_bytes() {
        let mut hobs = list(4096);
        let used = hobs.used_size();
        let a = hobs.create_hob(0x8000, 16).unwrap();
        let b = hobs.create_hob(0x8000, 32).unwrap();
        let c = hobs.create_hob(0x8000, 9).unwrap();

        assert_eq!(hobs.hob_at(a).unwrap().length(), 24);
        assert_eq!(hobs.hob_at(b).unwrap().length(), 40);
        assert_eq!(hobs.hob_at(c).unwrap().length(), 24);
        assert_eq!(b - a, 24);
        assert_eq!(c - b, 40);
        assert_eq!(hobs.used_size(), used + 24 + 40 + 24);

        let before = hobs.as_bytes().to_vec();
        let free = hobs.free_size();
        let err = hobs.create_hob(0x8000, free).unwrap_err();
        assert_eq!(err, HobError::OutOfResources { requested: free + 8, available: free });
        assert_eq!(hobs.as_bytes(), before.as_slice());
        assert_eq!(EfiError::from(err), EfiError::OutOfResources);
    }

    #[test]
    fn exact_fit_succeeds() {
        let mut hobs = list(0x100);
        let free = hobs.free_size();
        hobs.create_hob(0x8000, free - Header::SIZE).unwrap();
        assert_eq!(hobs.free_size(), 0);
        assert!(hobs.create_hob(0x8000, 0).is_err());
    }

    #[test]
    fn full_region_keeps_phit_and_end_marker() {
        let mut hobs = list(0x100);
        let free = hobs.free_size();
        let offset = hobs.create_hob(0x8000, free - Header::SIZE).unwrap();

        let bytes = hobs.as_bytes();
        assert_eq!(bytes.len(), 0x100);
        assert_eq!(&bytes[0x100 - END_LENGTH..0x100 - END_LENGTH + 2], &hob::END_OF_HOB_LIST.to_le_bytes());
        let phit = hobs.phit();
        assert_eq!(phit.end_of_hob_list, BASE + 0x100 - END_LENGTH as u64);
        assert_eq!(phit.free_memory_bottom, BASE + 0x100);
        assert_eq!(hobs.iter().map(|hob| hob.offset()).collect::<Vec<_>>(), vec![0, offset]);
    }

    #[test]
    fn oversized_record_is_rejected() {
        let mut hobs = list(0x20000);
        assert!(matches!(hobs.create_hob(0x8000, 0x10000), Err(HobError::RecordTooLarge(_))));
    }

    #[test]
    fn walk_visits_every_record_once() {
        let mut hobs = list(0x1000);
        hobs.build_cpu_hob(48, 16).unwrap();
        hobs.build_guid_hob(&GUID_A, &[1, 2, 3]).unwrap();
        hobs.build_fv_hob(0xFF00_0000, 0x10_0000).unwrap();
        hobs.build_resource_descriptor_hob(
            &UNNAMED_ALLOCATION,
            hob::resource_type::SYSTEM_MEMORY,
            ResourceAttributes::PRESENT | ResourceAttributes::INITIALIZED | ResourceAttributes::TESTED,
            0,
            0x8000_0000,
        )
        .unwrap();

        let lengths: usize = hobs.iter().map(|hob| hob.length()).sum();
        assert_eq!(lengths + END_LENGTH, hobs.used_size());
        let offsets: Vec<usize> = hobs.iter().map(|hob| hob.offset()).collect();
        let mut sorted = offsets.clone();
        sorted.dedup();
        assert_eq!(offsets, sorted);
        assert_eq!(offsets.len(), 5);

        // Restartable from the head.
        assert_eq!(hobs.iter().count(), hobs.iter().count());
    }

    #[test]
    fn guid_hob_round_trips() {
        let mut hobs = list(0x1000);
        let data = [0xA5u8; 24];
        hobs.build_guid_hob(&GUID_B, &[9; 8]).unwrap();
        let offset = hobs.build_guid_hob(&GUID_A, &data).unwrap();

        let hob = hobs.get_first_guid_hob(&GUID_A).unwrap();
        assert_eq!(hob.offset(), offset);
        assert_eq!(hob.guid_data().unwrap(), &data);
        match hob.decode() {
            Hob::GuidExtension { name, data: decoded } => {
                assert_eq!(name, GUID_A);
                assert_eq!(decoded, &data);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn guid_hob_data_keeps_padding() {
        let mut hobs = list(0x1000);
        hobs.build_guid_hob(&GUID_A, &[1, 2, 3]).unwrap();
        let data = hobs.get_first_guid_hob(&GUID_A).unwrap().guid_data().unwrap();
        assert_eq!(data, &[1, 2, 3, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn next_guid_hob_continues_after_previous() {
        let mut hobs = list(0x1000);
        let first = hobs.build_guid_hob(&GUID_A, &[1; 8]).unwrap();
        hobs.build_guid_hob(&GUID_B, &[2; 8]).unwrap();
        let second = hobs.build_guid_hob(&GUID_A, &[3; 8]).unwrap();

        assert_eq!(hobs.get_first_guid_hob(&GUID_A).unwrap().offset(), first);
        assert_eq!(hobs.get_next_guid_hob(&GUID_A, Some(first)).unwrap().offset(), second);
        assert!(hobs.get_next_guid_hob(&GUID_A, Some(second)).is_none());
        assert_eq!(hobs.guid_hobs(&GUID_A).count(), 2);
        assert!(hobs.get_first_guid_hob(&UNNAMED_ALLOCATION).is_none());
    }

    #[test]
    fn get_next_hob_filters_by_type() {
        let mut hobs = list(0x1000);
        let fv1 = hobs.build_fv_hob(0x1000, 0x100).unwrap();
        hobs.build_cpu_hob(39, 16).unwrap();
        let fv2 = hobs.build_fv_hob(0x2000, 0x200).unwrap();

        assert_eq!(hobs.get_next_hob(hob::FV, None).unwrap().offset(), fv1);
        assert_eq!(hobs.get_next_hob(hob::FV, Some(fv1)).unwrap().offset(), fv2);
        assert!(hobs.get_next_hob(hob::FV, Some(fv2)).is_none());
        assert_eq!(hobs.iter_type(hob::FV).count(), 2);
        match hobs.hob_at(fv2).unwrap().decode() {
            Hob::FirmwareVolume(fv) => assert_eq!((fv.base_address, fv.length), (0x2000, 0x200)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn typed_builders_decode() {
        let mut hobs = list(0x1000);
        let mem = hobs.build_memory_allocation_hob(&GUID_A, 0x10_0000, 0x4000, 4).unwrap();
        let cpu = hobs.build_cpu_hob(48, 16).unwrap();
        let fv2 = hobs.build_fv2_hob(0x3000, 0x1000, &GUID_A, &GUID_B).unwrap();
        let cap = hobs.build_capsule_hob(0x9000, 0x800).unwrap();

        match hobs.hob_at(mem).unwrap().decode() {
            Hob::MemoryAllocation(alloc) => {
                assert_eq!(alloc.name(), GUID_A);
                assert_eq!(alloc.memory_base_address, 0x10_0000);
                assert_eq!(alloc.memory_type, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(hobs.hob_at(cpu).unwrap().decode(), Hob::Cpu(c) if c.size_of_memory_space == 48));
        assert!(matches!(
            hobs.hob_at(fv2).unwrap().decode(),
            Hob::FirmwareVolume2(f) if f.file_name == *GUID_B.as_bytes()
        ));
        assert!(matches!(hobs.hob_at(cap).unwrap().decode(), Hob::Capsule(c) if c.base_address == 0x9000));
    }

    #[test]
    fn hob_at_rejects_non_records() {
        let hobs = list(0x1000);
        assert_eq!(hobs.hob_at(hobs.used_size()).unwrap_err(), HobError::InvalidOffset(hobs.used_size()));
        assert_eq!(hobs.hob_at(PHIT_LENGTH).unwrap_err(), HobError::InvalidOffset(PHIT_LENGTH));
    }

    #[test]
    fn boot_mode_is_stored_in_phit() {
        let mut hobs = list(0x1000);
        assert_eq!(hobs.boot_mode(), boot_mode::BOOT_WITH_FULL_CONFIGURATION);
        hobs.set_boot_mode(boot_mode::BOOT_ON_S3_RESUME);
        assert_eq!(hobs.boot_mode(), boot_mode::BOOT_ON_S3_RESUME);
        hobs.build_cpu_hob(1, 1).unwrap();
        assert_eq!(hobs.boot_mode(), boot_mode::BOOT_ON_S3_RESUME);
    }

    #[test]
    fn from_bytes_adopts_valid_list() {
        let mut hobs = list(0x400);
        hobs.build_guid_hob(&GUID_A, &[7; 16]).unwrap();
        let bytes = hobs.as_bytes().to_vec();

        let adopted = HobList::from_bytes(BASE, bytes.clone()).unwrap();
        assert_eq!(adopted.as_bytes(), bytes.as_slice());
        assert_eq!(adopted.get_first_guid_hob(&GUID_A).unwrap().guid_data().unwrap(), &[7; 16]);
        assert_eq!(adopted.free_size(), 0);
    }

    #[test]
    fn from_bytes_rejects_corruption() {
        let mut hobs = list(0x400);
        let offset = hobs.build_cpu_hob(1, 1).unwrap();
        let good = hobs.as_bytes().to_vec();

        let mut no_phit = good.clone();
        no_phit[0] = hob::CPU as u8;
        assert_eq!(HobList::from_bytes(BASE, no_phit).unwrap_err(), HobError::MissingHandoff);

        let mut zero_length = good.clone();
        zero_length[offset + 2] = 0;
        assert_eq!(HobList::from_bytes(BASE, zero_length).unwrap_err(), HobError::CorruptRecord { offset });

        let mut unaligned = good.clone();
        unaligned[offset + 2] = 12;
        assert_eq!(HobList::from_bytes(BASE, unaligned).unwrap_err(), HobError::CorruptRecord { offset });

        let truncated = good[..good.len() - END_LENGTH].to_vec();
        assert_eq!(HobList::from_bytes(BASE, truncated).unwrap_err(), HobError::MissingEnd);

        let wrapping = HobList::from_bytes(u64::MAX - 0x10, good.clone()).unwrap_err();
        assert_eq!(wrapping, HobError::CorruptRecord { offset: good.len() - END_LENGTH });

        let err = HobList::from_bytes(BASE + 0x1000, good).unwrap_err();
        assert!(matches!(err, HobError::EndMismatch { .. }));
        assert_eq!(EfiError::from(err), EfiError::CompromisedData);
    }

    #[test]
    fn relocate_rebases_phit_and_keeps_records() {
        let mut hobs = list(0x200);
        let offset = hobs.build_guid_hob(&GUID_A, &[4; 8]).unwrap();
        let records = hobs.as_bytes()[PHIT_LENGTH..].to_vec();

        let moved = hobs.relocate(0x8000_0000, 0x1000).unwrap();
        assert_eq!(moved.base(), 0x8000_0000);
        assert_eq!(moved.capacity(), 0x1000);
        assert_eq!(&moved.as_bytes()[PHIT_LENGTH..], records.as_slice());
        let phit = moved.phit();
        assert_eq!(phit.memory_bottom, 0x8000_0000);
        assert_eq!(phit.free_memory_top, 0x8000_1000);
        assert_eq!(phit.end_of_hob_list, moved.address_of(moved.used_size() - END_LENGTH));
        assert_eq!(moved.get_first_guid_hob(&GUID_A).unwrap().offset(), offset);

        let adopted = HobList::from_bytes(0x8000_0000, moved.as_bytes().to_vec());
        assert!(adopted.is_ok());
    }

    #[test]
    fn relocate_needs_room_for_records() {
        let mut hobs = list(0x200);
        hobs.build_guid_hob(&GUID_A, &[4; 64]).unwrap();
        let used = hobs.used_size();
        assert_eq!(
            hobs.relocate(0, 0x40).unwrap_err(),
            HobError::OutOfResources { requested: used, available: 0x40 }
        );
    }

    #[test]
    fn display_lists_records() {
        let mut hobs = list(0x200);
        hobs.build_fv_hob(0xFF00_0000, 0x1000).unwrap();
        let text = format!("{hobs}");
        assert!(text.contains("PHIT v9"));
        assert!(text.contains("FirmwareVolume [0xff000000, +0x1000)"));
    }
}
