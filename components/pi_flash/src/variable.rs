//! Non-volatile variable store.
//!
//! The store is a [`VariableStoreHeader`] followed by variable records, each a [`VariableHeader`], the UCS-2 name
//! with its NUL terminator, then the data. Records start on a [`HEADER_ALIGNMENT`] boundary and the name is padded
//! to the same boundary. The first slot whose `start_id` is not [`VARIABLE_DATA`] ends the list.
//!
//! Records are never rewritten in place. An update appends a new record and retires the old one through state
//! transitions that only clear bits:
//!
//! 1. old record: `VAR_ADDED` -> `VAR_IN_DELETED_TRANSITION`
//! 2. new record: header appended, then `VAR_HEADER_VALID_ONLY`, name and data, then `VAR_ADDED`
//! 3. old record: `VAR_DELETED`
//!
//! A store interrupted between steps holds both copies; [`VariableStore::open`] keeps the `VAR_ADDED` one. When the
//! store fills, it is reclaimed by erasing it and writing back only the live variables.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{string::String, vec, vec::Vec};
use core::fmt;

use pi_sdk::{
    error::{EfiError, Result},
    pi::variable::{
        attributes, state, VariableHeader, VariableStoreHeader, HEADER_ALIGNMENT, VARIABLE_DATA, VARIABLE_GUID,
        VARIABLE_STORE_FORMATTED, VARIABLE_STORE_HEALTHY,
    },
    runtime::VariableStorage,
};
use r_efi::efi;
use scroll::{Pread, Pwrite, LE};

use crate::nor::NorFlash;

const SUPPORTED_ATTRIBUTES: u32 =
    attributes::NON_VOLATILE | attributes::BOOTSERVICE_ACCESS | attributes::RUNTIME_ACCESS;
const IN_TRANSITION: u8 = state::VAR_ADDED & state::VAR_IN_DELETED_TRANSITION;

fn align(value: usize) -> usize {
    value.next_multiple_of(HEADER_ALIGNMENT)
}

fn encode_name(name: &str) -> Vec<u8> {
    name.encode_utf16().chain(core::iter::once(0)).flat_map(u16::to_le_bytes).collect()
}

fn decode_name(bytes: &[u8]) -> Option<String> {
    let units: Vec<u16> = bytes.chunks_exact(2).map(|unit| u16::from_le_bytes([unit[0], unit[1]])).collect();
    match units.split_last() {
        Some((&0, name)) => String::from_utf16(name).ok(),
        _ => None,
    }
}

/// A variable as held in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub vendor: efi::Guid,
    pub attributes: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Record {
    offset: usize,
    header: VariableHeader,
    name: String,
}

impl Record {
    fn is_live(&self) -> bool {
        self.header.state == state::VAR_ADDED || self.header.state == IN_TRANSITION
    }

    fn data_offset(&self) -> usize {
        self.offset + VariableHeader::SIZE + align(self.header.name_size as usize)
    }

    fn matches(&self, name: &str, vendor: &efi::Guid) -> bool {
        self.name == name && self.header.vendor_guid() == *vendor
    }
}

fn record_size(name_size: usize, data_size: usize) -> usize {
    align(VariableHeader::SIZE + align(name_size) + data_size)
}

pub struct VariableStore<F> {
    flash: F,
    base: usize,
    size: usize,
    end: usize,
}

impl<F: NorFlash> VariableStore<F> {
    /// Erase the region `[base, base + size)` and write an empty store header.
    ///
    /// The region must be whole blocks.
    pub fn format(mut flash: F, base: usize, size: usize) -> Result<Self> {
        let block_size = flash.block_size();
        if block_size == 0 || base % block_size != 0 || size % block_size != 0 || size <= VariableStoreHeader::SIZE {
            return Err(EfiError::InvalidParameter);
        }
        let size_field = u32::try_from(size).map_err(|_| EfiError::InvalidParameter)?;
        let first_lba = base / block_size;
        flash.lba_info(first_lba + size / block_size - 1)?;

        for lba in first_lba..first_lba + size / block_size {
            flash.erase_block(lba)?;
        }
        let header = VariableStoreHeader {
            signature: *VARIABLE_GUID.as_bytes(),
            size: size_field,
            format: VARIABLE_STORE_FORMATTED,
            state: VARIABLE_STORE_HEALTHY,
            reserved: 0,
            reserved1: 0,
        };
        let mut bytes = [0u8; VariableStoreHeader::SIZE];
        bytes.pwrite_with(header, 0, LE).map_err(|_| EfiError::BadBufferSize)?;
        flash.program(base, &bytes)?;
        log::info!(target: "pi_variable", "formatted variable store at {base:#x}, {size:#x} bytes");
        Ok(Self { flash, base, size, end: align(base + VariableStoreHeader::SIZE) })
    }

    /// Open the store whose header is at `base`.
    pub fn open(flash: F, base: usize) -> Result<Self> {
        let mut bytes = [0u8; VariableStoreHeader::SIZE];
        flash.read(base, &mut bytes)?;
        let header: VariableStoreHeader = bytes.pread_with(0, LE).map_err(|_| EfiError::VolumeCorrupted)?;
        let size = header.size as usize;
        let fits = base.checked_add(size).is_some_and(|end| end <= flash.block_size() * flash.block_count());
        if header.signature() != VARIABLE_GUID
            || header.format != VARIABLE_STORE_FORMATTED
            || header.state != VARIABLE_STORE_HEALTHY
            || size <= VariableStoreHeader::SIZE
            || !fits
        {
            log::error!(target: "pi_variable", "no valid variable store at {base:#x}");
            return Err(EfiError::VolumeCorrupted);
        }

        let mut store = Self { flash, base, size, end: 0 };
        store.finish_interrupted_update()?;
        Ok(store)
    }

    /// Open the store at `base`, formatting `size` bytes there if the region is blank.
    pub fn open_or_format(flash: F, base: usize, size: usize) -> Result<Self> {
        let mut bytes = [0u8; VariableStoreHeader::SIZE];
        flash.read(base, &mut bytes)?;
        if bytes.iter().all(|byte| *byte == 0xFF) {
            Self::format(flash, base, size)
        } else {
            Self::open(flash, base)
        }
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Bytes left for new records before a reclaim is needed.
    pub fn free_space(&self) -> usize {
        self.base + self.size - self.end
    }

    /// Walk the records, returning them and the offset where the list ends.
    fn scan(&self) -> Result<(Vec<Record>, usize)> {
        let limit = self.base + self.size;
        let mut offset = align(self.base + VariableStoreHeader::SIZE);
        let mut records = Vec::new();
        while offset + VariableHeader::SIZE <= limit {
            let mut bytes = [0u8; VariableHeader::SIZE];
            self.flash.read(offset, &mut bytes)?;
            let header: VariableHeader = bytes.pread_with(0, LE).map_err(|_| EfiError::VolumeCorrupted)?;
            if header.start_id != VARIABLE_DATA {
                break;
            }
            let next = offset + record_size(header.name_size as usize, header.data_size as usize);
            if next > limit {
                log::warn!(target: "pi_variable", "variable record at {offset:#x} overruns the store");
                // Nothing may be appended over the damaged tail until the store is reclaimed.
                offset = limit;
                break;
            }
            let mut name = vec![0u8; header.name_size as usize];
            self.flash.read(offset + VariableHeader::SIZE, &mut name)?;
            // A record torn before its name was written decodes to an empty name and is never live.
            records.push(Record { offset, header, name: decode_name(&name).unwrap_or_default() });
            offset = next;
        }
        Ok((records, offset))
    }

    fn set_state(&mut self, offset: usize, state: u8) -> Result<()> {
        self.flash.program(offset + VariableHeader::STATE_OFFSET, &[state])
    }

    /// Retire the `VAR_IN_DELETED_TRANSITION` copy of any variable that also has a `VAR_ADDED` copy.
    fn finish_interrupted_update(&mut self) -> Result<()> {
        let (records, end) = self.scan()?;
        self.end = end;
        for stale in records.iter().filter(|record| record.header.state == IN_TRANSITION) {
            let replaced = records.iter().any(|record| {
                record.header.state == state::VAR_ADDED && record.matches(&stale.name, &stale.header.vendor_guid())
            });
            if replaced {
                log::info!(target: "pi_variable", "retiring superseded copy of variable {}", stale.name);
                self.set_state(stale.offset, state::VAR_DELETED)?;
            }
        }
        Ok(())
    }

    fn live(&self) -> Result<Vec<Record>> {
        let (records, _) = self.scan()?;
        let mut live: Vec<Record> = Vec::new();
        for record in records.into_iter().filter(Record::is_live) {
            match live.iter_mut().find(|kept| kept.matches(&record.name, &record.header.vendor_guid())) {
                Some(kept) if kept.header.state == IN_TRANSITION => *kept = record,
                Some(_) => {}
                None => live.push(record),
            }
        }
        Ok(live)
    }

    fn find(&self, name: &str, vendor: &efi::Guid) -> Result<Option<Record>> {
        Ok(self.live()?.into_iter().find(|record| record.matches(name, vendor)))
    }

    fn read_data(&self, record: &Record) -> Result<Vec<u8>> {
        let mut data = vec![0u8; record.header.data_size as usize];
        self.flash.read(record.data_offset(), &mut data)?;
        Ok(data)
    }

    /// Every live variable, in store order.
    pub fn variables(&self) -> Result<Vec<Variable>> {
        self.live()?
            .iter()
            .map(|record| {
                Ok(Variable {
                    name: record.name.clone(),
                    vendor: record.header.vendor_guid(),
                    attributes: record.header.attributes,
                    data: self.read_data(record)?,
                })
            })
            .collect()
    }

    fn append(&mut self, name: &[u8], vendor: &efi::Guid, attributes: u32, data: &[u8]) -> Result<()> {
        let offset = self.end;
        let header = VariableHeader {
            start_id: VARIABLE_DATA,
            state: 0xFF,
            reserved: 0,
            attributes,
            name_size: name.len() as u32,
            data_size: data.len() as u32,
            vendor_guid: *vendor.as_bytes(),
        };
        let mut bytes = [0u8; VariableHeader::SIZE];
        bytes.pwrite_with(header, 0, LE).map_err(|_| EfiError::BadBufferSize)?;
        self.flash.program(offset, &bytes)?;
        self.end = offset + record_size(name.len(), data.len());
        self.set_state(offset, state::VAR_HEADER_VALID_ONLY)?;
        self.flash.program(offset + VariableHeader::SIZE, name)?;
        self.flash.program(offset + VariableHeader::SIZE + align(name.len()), data)?;
        self.set_state(offset, state::VAR_ADDED)
    }

    /// Erase the store and write back only its live variables.
    pub fn reclaim(&mut self) -> Result<()> {
        let variables = self.variables()?;
        let block_size = self.flash.block_size();
        let first_lba = self.base / block_size;
        for lba in first_lba..first_lba + self.size / block_size {
            self.flash.erase_block(lba)?;
        }
        let header = VariableStoreHeader {
            signature: *VARIABLE_GUID.as_bytes(),
            size: self.size as u32,
            format: VARIABLE_STORE_FORMATTED,
            state: VARIABLE_STORE_HEALTHY,
            reserved: 0,
            reserved1: 0,
        };
        let mut bytes = [0u8; VariableStoreHeader::SIZE];
        bytes.pwrite_with(header, 0, LE).map_err(|_| EfiError::BadBufferSize)?;
        self.flash.program(self.base, &bytes)?;
        self.end = align(self.base + VariableStoreHeader::SIZE);
        for variable in &variables {
            self.append(&encode_name(&variable.name), &variable.vendor, variable.attributes, &variable.data)?;
        }
        log::info!(
            target: "pi_variable",
            "reclaimed variable store, {} variables kept, {:#x} bytes free",
            variables.len(),
            self.free_space()
        );
        Ok(())
    }

    fn check_attributes(attributes: u32) -> Result<()> {
        if attributes & !SUPPORTED_ATTRIBUTES != 0 {
            return Err(EfiError::Unsupported);
        }
        if attributes & attributes::NON_VOLATILE == 0 {
            return Err(EfiError::InvalidParameter);
        }
        if attributes & attributes::RUNTIME_ACCESS != 0 && attributes & attributes::BOOTSERVICE_ACCESS == 0 {
            return Err(EfiError::InvalidParameter);
        }
        Ok(())
    }

    fn delete(&mut self, name: &str, vendor: &efi::Guid) -> Result<()> {
        let Some(existing) = self.find(name, vendor)? else {
            return Err(EfiError::NotFound);
        };
        self.set_state(existing.offset, state::VAR_DELETED)?;
        log::debug!(target: "pi_variable", "deleted variable {name}");
        Ok(())
    }

    fn update(&mut self, name: &str, vendor: &efi::Guid, attributes: u32, data: &[u8]) -> Result<()> {
        Self::check_attributes(attributes)?;
        let encoded = encode_name(name);
        let size = record_size(encoded.len(), data.len());
        if size > self.size - align(VariableStoreHeader::SIZE) {
            return Err(EfiError::OutOfResources);
        }

        let existing = self.find(name, vendor)?;
        if let Some(existing) = &existing {
            if existing.header.attributes != attributes {
                return Err(EfiError::InvalidParameter);
            }
            if self.read_data(existing)? == data {
                return Ok(());
            }
        }

        if size > self.free_space() {
            self.reclaim()?;
            if size > self.free_space() {
                log::warn!(target: "pi_variable", "variable store full, cannot write {name} ({size:#x} bytes)");
                return Err(EfiError::OutOfResources);
            }
        }
        // Reclaim may have moved the old copy.
        let existing = match existing {
            Some(_) => self.find(name, vendor)?,
            None => None,
        };

        if let Some(old) = &existing {
            self.set_state(old.offset, IN_TRANSITION)?;
        }
        self.append(&encoded, vendor, attributes, data)?;
        if let Some(old) = &existing {
            self.set_state(old.offset, state::VAR_DELETED)?;
        }
        log::debug!(target: "pi_variable", "wrote variable {name}, {:#x} bytes", data.len());
        Ok(())
    }
}

impl<F: NorFlash> VariableStorage for VariableStore<F> {
    fn get_variable(&self, name: &str, vendor: &efi::Guid) -> Result<(u32, Vec<u8>)> {
        let record = self.find(name, vendor)?.ok_or(EfiError::NotFound)?;
        Ok((record.header.attributes, self.read_data(&record)?))
    }

    fn set_variable(&mut self, name: &str, vendor: &efi::Guid, attributes: u32, data: &[u8]) -> Result<()> {
        if name.is_empty() {
            return Err(EfiError::InvalidParameter);
        }
        if data.is_empty() {
            self.delete(name, vendor)
        } else {
            self.update(name, vendor, attributes, data)
        }
    }

    fn variable_names(&self) -> Result<Vec<(String, efi::Guid)>> {
        Ok(self.variables()?.into_iter().map(|variable| (variable.name, variable.vendor)).collect())
    }
}

impl<F> fmt::Debug for VariableStore<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableStore")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .field("end", &format_args!("{:#x}", self.end))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nor::{MemoryFlash, MockNorFlash};

    const BLOCK: usize = 0x100;
    const NV_BS: u32 = attributes::NON_VOLATILE | attributes::BOOTSERVICE_ACCESS;
    const NV_BS_RT: u32 = NV_BS | attributes::RUNTIME_ACCESS;
    const VENDOR: efi::Guid =
        efi::Guid::from_fields(0x3a4f2c91, 0x6b1d, 0x4e8a, 0x9c, 0x27, &[0x51, 0x0d, 0xe6, 0x83, 0x4a, 0x1f]);

    fn store() -> VariableStore<MemoryFlash> {
        VariableStore::format(MemoryFlash::new(BLOCK, 4), BLOCK, 2 * BLOCK).unwrap()
    }

    #[test]
    fn variables_survive_reopen() {
        let mut store = store();
        store.set_variable("Lang", &VENDOR, NV_BS_RT, b"en-US").unwrap();
        store.set_variable("Timeout", &VENDOR, NV_BS, &5u16.to_le_bytes()).unwrap();

        let store = VariableStore::open(store.into_inner(), BLOCK).unwrap();
        assert_eq!(store.get_variable("Lang", &VENDOR), Ok((NV_BS_RT, b"en-US".to_vec())));
        assert_eq!(store.get_variable("Timeout", &VENDOR).unwrap().1, vec![5, 0]);
        assert_eq!(store.get_variable("Lang", &efi::Guid::from_bytes(&[0; 16])), Err(EfiError::NotFound));
        let names = store.variable_names().unwrap();
        assert_eq!(names, vec![("Lang".into(), VENDOR), ("Timeout".into(), VENDOR)]);
    }

    #[test]
    fn update_replaces_and_delete_removes() {
        let mut store = store();
        store.set_variable("Boot0000", &VENDOR, NV_BS, b"first").unwrap();
        store.set_variable("Boot0000", &VENDOR, NV_BS, b"second").unwrap();
        assert_eq!(store.get_variable("Boot0000", &VENDOR).unwrap().1, b"second");
        assert_eq!(store.variables().unwrap().len(), 1);

        store.set_variable("Boot0000", &VENDOR, NV_BS, &[]).unwrap();
        assert_eq!(store.get_variable("Boot0000", &VENDOR), Err(EfiError::NotFound));
        assert_eq!(store.set_variable("Boot0000", &VENDOR, NV_BS, &[]), Err(EfiError::NotFound));
    }

    #[test]
    fn rewriting_identical_data_does_not_touch_flash() {
        let mut store = store();
        store.set_variable("Lang", &VENDOR, NV_BS, b"en").unwrap();
        let before = store.free_space();
        store.set_variable("Lang", &VENDOR, NV_BS, b"en").unwrap();
        assert_eq!(store.free_space(), before);
    }

    #[test]
    fn attributes_are_checked() {
        let mut store = store();
        let bs_only = attributes::BOOTSERVICE_ACCESS;
        assert_eq!(store.set_variable("Volatile", &VENDOR, bs_only, b"x"), Err(EfiError::InvalidParameter));
        let rt_only = attributes::NON_VOLATILE | attributes::RUNTIME_ACCESS;
        assert_eq!(store.set_variable("RtOnly", &VENDOR, rt_only, b"x"), Err(EfiError::InvalidParameter));
        let hw = NV_BS | attributes::HARDWARE_ERROR_RECORD;
        assert_eq!(store.set_variable("HwErr", &VENDOR, hw, b"x"), Err(EfiError::Unsupported));
        assert_eq!(store.set_variable("", &VENDOR, NV_BS, b"x"), Err(EfiError::InvalidParameter));

        store.set_variable("Lang", &VENDOR, NV_BS, b"en").unwrap();
        assert_eq!(store.set_variable("Lang", &VENDOR, NV_BS_RT, b"fr"), Err(EfiError::InvalidParameter));
    }

    #[test]
    fn full_store_is_reclaimed() {
        let mut store = store();
        for round in 0..40u8 {
            store.set_variable("Counter", &VENDOR, NV_BS, &[round; 24]).unwrap();
        }
        assert_eq!(store.get_variable("Counter", &VENDOR).unwrap().1, vec![39; 24]);
        assert_eq!(store.variables().unwrap().len(), 1);
    }

    #[test]
    fn oversized_variable_is_refused() {
        let mut store = store();
        store.set_variable("Small", &VENDOR, NV_BS, b"kept").unwrap();
        assert_eq!(store.set_variable("Huge", &VENDOR, NV_BS, &[0; 2 * BLOCK]), Err(EfiError::OutOfResources));

        let big = vec![0xA5; 0x100];
        store.set_variable("Big", &VENDOR, NV_BS, &big).unwrap();
        assert_eq!(store.set_variable("Big2", &VENDOR, NV_BS, &big), Err(EfiError::OutOfResources));
        assert_eq!(store.get_variable("Small", &VENDOR).unwrap().1, b"kept");
    }

    #[test]
    fn interrupted_update_keeps_the_new_copy() {
        let mut store = store();
        store.set_variable("Lang", &VENDOR, NV_BS, b"en").unwrap();
        let old = store.find("Lang", &VENDOR).unwrap().unwrap().offset;

        // Power lost after the new copy was added but before the old one was deleted.
        store.set_state(old, IN_TRANSITION).unwrap();
        store.append(&encode_name("Lang"), &VENDOR, NV_BS, b"fr").unwrap();

        let store = VariableStore::open(store.into_inner(), BLOCK).unwrap();
        assert_eq!(store.get_variable("Lang", &VENDOR).unwrap().1, b"fr");
        let mut header = [0u8; 1];
        store.flash().read(old + VariableHeader::STATE_OFFSET, &mut header).unwrap();
        assert_eq!(header[0], IN_TRANSITION & state::VAR_DELETED);
    }

    #[test]
    fn interrupted_update_before_add_keeps_the_old_copy() {
        let mut store = store();
        store.set_variable("Lang", &VENDOR, NV_BS, b"en").unwrap();
        let old = store.find("Lang", &VENDOR).unwrap().unwrap().offset;
        store.set_state(old, IN_TRANSITION).unwrap();

        let store = VariableStore::open(store.into_inner(), BLOCK).unwrap();
        assert_eq!(store.get_variable("Lang", &VENDOR).unwrap().1, b"en");
    }

    #[test]
    fn corrupt_header_is_rejected() {
        let flash = store().into_inner();
        let mut bytes = flash.into_bytes();
        bytes[BLOCK] ^= 0xFF;
        let flash = MemoryFlash::from_bytes(BLOCK, bytes).unwrap();
        assert_eq!(VariableStore::open(flash, BLOCK).err(), Some(EfiError::VolumeCorrupted));

        let blank = VariableStore::open_or_format(MemoryFlash::new(BLOCK, 4), 0, BLOCK).unwrap();
        assert_eq!(blank.variables().unwrap(), Vec::new());
        assert!(VariableStore::format(MemoryFlash::new(BLOCK, 4), 0x10, BLOCK).is_err());
    }

    #[test]
    fn device_errors_propagate() {
        let mut flash = MockNorFlash::new();
        flash.expect_read().returning(|_, _| Err(EfiError::DeviceError));
        assert_eq!(VariableStore::open(flash, 0).err(), Some(EfiError::DeviceError));
    }
}
