//! Typed views of individual HOB records.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt;

use pi_sdk::{
    guid_fmt,
    pi::hob::{self, Header},
};
use r_efi::efi;
use scroll::{Pread, LE};

/// A borrowed HOB record inside a [`HobList`](crate::HobList).
#[derive(Clone, Copy)]
pub struct HobRef<'a> {
    offset: usize,
    header: Header,
    payload: &'a [u8],
}

impl<'a> HobRef<'a> {
    pub(crate) fn new(offset: usize, header: Header, payload: &'a [u8]) -> Self {
        Self { offset, header, payload }
    }

    /// Offset of the record header from the start of the list.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn r#type(&self) -> u16 {
        self.header.r#type
    }

    /// Length of the whole record, header included.
    pub fn length(&self) -> usize {
        self.header.length as usize
    }

    /// Everything after the generic header, alignment padding included.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// The name of a GUID extension record.
    pub fn guid(&self) -> Option<efi::Guid> {
        if self.header.r#type != hob::GUID_EXTENSION {
            return None;
        }
        let bytes: &[u8; 16] = self.payload.get(..16)?.try_into().ok()?;
        Some(efi::Guid::from_bytes(bytes))
    }

    /// The data of a GUID extension record, after its name.
    pub fn guid_data(&self) -> Option<&'a [u8]> {
        self.guid().map(|_| &self.payload[16..])
    }

    /// Decode the payload into its typed form.
    pub fn decode(&self) -> Hob<'a> {
        let payload = self.payload;
        let decoded = match self.header.r#type {
            hob::HANDOFF => payload.pread_with(0, LE).ok().map(Hob::Handoff),
            hob::MEMORY_ALLOCATION => payload.pread_with(0, LE).ok().map(Hob::MemoryAllocation),
            hob::RESOURCE_DESCRIPTOR => payload.pread_with(0, LE).ok().map(Hob::ResourceDescriptor),
            hob::GUID_EXTENSION => self.guid().map(|name| Hob::GuidExtension { name, data: &payload[16..] }),
            hob::FV => payload.pread_with(0, LE).ok().map(Hob::FirmwareVolume),
            hob::FV2 => payload.pread_with(0, LE).ok().map(Hob::FirmwareVolume2),
            hob::CPU => payload.pread_with(0, LE).ok().map(Hob::Cpu),
            hob::MEMORY_POOL => Some(Hob::MemoryPool(payload)),
            hob::UEFI_CAPSULE => payload.pread_with(0, LE).ok().map(Hob::Capsule),
            hob::UNUSED => Some(Hob::Unused),
            hob::END_OF_HOB_LIST => Some(Hob::End),
            _ => None,
        };
        decoded.unwrap_or(Hob::Other { r#type: self.header.r#type, payload })
    }
}

impl fmt::Debug for HobRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HobRef")
            .field("offset", &self.offset)
            .field("type", &format_args!("{:#06x}", self.header.r#type))
            .field("length", &self.header.length)
            .finish()
    }
}

/// A decoded HOB record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hob<'a> {
    Handoff(hob::PhaseHandoffInfoTable),
    MemoryAllocation(hob::MemoryAllocation),
    ResourceDescriptor(hob::ResourceDescriptor),
    GuidExtension { name: efi::Guid, data: &'a [u8] },
    FirmwareVolume(hob::FirmwareVolume),
    FirmwareVolume2(hob::FirmwareVolume2),
    Cpu(hob::Cpu),
    MemoryPool(&'a [u8]),
    Capsule(hob::UefiCapsule),
    Unused,
    End,
    /// A type this crate does not decode, or a payload too short for its type.
    Other { r#type: u16, payload: &'a [u8] },
}

impl fmt::Display for Hob<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hob::Handoff(phit) => write!(
                f,
                "PHIT v{} boot mode {:#x} memory [{:#x}, {:#x}) free [{:#x}, {:#x}) end {:#x}",
                phit.version,
                phit.boot_mode,
                phit.memory_bottom,
                phit.memory_top,
                phit.free_memory_bottom,
                phit.free_memory_top,
                phit.end_of_hob_list
            ),
            Hob::MemoryAllocation(alloc) => write!(
                f,
                "MemoryAllocation {} base {:#x} length {:#x} type {}",
                guid_fmt!(alloc.name()),
                alloc.memory_base_address,
                alloc.memory_length,
                alloc.memory_type
            ),
            Hob::ResourceDescriptor(res) => write!(
                f,
                "ResourceDescriptor type {} attributes {:#x} [{:#x}, +{:#x})",
                res.resource_type, res.resource_attribute, res.physical_start, res.resource_length
            ),
            Hob::GuidExtension { name, data } => {
                write!(f, "GuidExtension {} ({:#x} bytes)", guid_fmt!(name), data.len())
            }
            Hob::FirmwareVolume(fv) => write!(f, "FirmwareVolume [{:#x}, +{:#x})", fv.base_address, fv.length),
            Hob::FirmwareVolume2(fv) => write!(
                f,
                "FirmwareVolume2 [{:#x}, +{:#x}) fv {} file {}",
                fv.base_address,
                fv.length,
                guid_fmt!(efi::Guid::from_bytes(&fv.fv_name)),
                guid_fmt!(efi::Guid::from_bytes(&fv.file_name))
            ),
            Hob::Cpu(cpu) => {
                write!(f, "Cpu memory space {} io space {}", cpu.size_of_memory_space, cpu.size_of_io_space)
            }
            Hob::MemoryPool(data) => write!(f, "MemoryPool ({:#x} bytes)", data.len()),
            Hob::Capsule(capsule) => write!(f, "Capsule [{:#x}, +{:#x})", capsule.base_address, capsule.length),
            Hob::Unused => write!(f, "Unused"),
            Hob::End => write!(f, "EndOfHobList"),
            Hob::Other { r#type, payload } => write!(f, "Type {:#06x} ({:#x} bytes)", r#type, payload.len()),
        }
    }
}

/// Lazy walk over the records of a list, stopping at the end marker.
///
/// Created by [`HobList::iter`](crate::HobList::iter). The end marker itself is not yielded.
pub struct HobIter<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> HobIter<'a> {
    pub(crate) fn new(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset, done: false }
    }
}

impl<'a> Iterator for HobIter<'a> {
    type Item = HobRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(record) = read_record(self.data, self.offset) else {
            log::error!(target: "pi_hob", "HOB walk stopped at corrupt record {:#x}", self.offset);
            self.done = true;
            return None;
        };
        if record.r#type() == hob::END_OF_HOB_LIST {
            self.done = true;
            return None;
        }
        self.offset += record.length();
        Some(record)
    }
}

impl core::iter::FusedIterator for HobIter<'_> {}

/// Bounds-checked read of the record at `offset`. `None` for a truncated, zero-length, or unaligned record.
pub(crate) fn read_record(data: &[u8], offset: usize) -> Option<HobRef<'_>> {
    let header: Header = data.pread_with(offset, LE).ok()?;
    let length = header.length as usize;
    if length < Header::SIZE || length % 8 != 0 {
        return None;
    }
    let end = offset.checked_add(length)?;
    let payload = data.get(offset + Header::SIZE..end)?;
    Some(HobRef::new(offset, header, payload))
}
