//! Fault tolerant write.
//!
//! A block update is staged through a spare block and tracked in a write queue held in a dedicated working block:
//!
//! ```text
//! working block: [ WorkingBlockHeader | WriteHeader WriteRecord | WriteHeader WriteRecord | ... erased ... ]
//! ```
//!
//! Progress is recorded by clearing state bits, so every step is a single program operation. The header's
//! `HEADER_ALLOCATED` and `WRITES_ALLOCATED` bits are cleared first, then the record's `SPARE_COMPLETE` once the
//! updated block sits in the spare, its `DESTINATION_COMPLETE` once it has been copied to the target, and finally the
//! header's `COMPLETE`. [`FaultTolerantWrite::open`] finishes a write interrupted after the spare was staged and
//! drops one interrupted before, so the target block always holds either its old or its new contents.
//!
//! The working block header CRC32 covers the header with its `crc` and `state` fields read as erased.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{vec, vec::Vec};
use core::fmt;

use pi_sdk::{
    error::EfiError,
    pi::ftw::{
        working_block_state, write_header_state, write_record_state, WorkingBlockHeader, WriteHeader, WriteRecord,
        ERASED_BYTE, WORKING_BLOCK_SIGNATURE_GUID,
    },
};
use scroll::{
    ctx::{TryFromCtx, TryIntoCtx},
    Endian, Pread, Pwrite, LE,
};

use crate::nor::NorFlash;

const SLOT_SIZE: usize = WriteHeader::SIZE + WriteRecord::SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtwError {
    /// The working and spare blocks must be distinct blocks on the device.
    InvalidLayout { working: usize, spare: usize },
    /// The working block cannot hold the header and one queued write.
    WorkingBlockTooSmall(usize),
    /// Writes to the working or spare block are not allowed.
    ReservedBlock(usize),
    OutOfRange { lba: usize, offset: usize, length: usize },
    /// A queue entry could not be encoded or decoded.
    Malformed,
    Device(EfiError),
}

impl fmt::Display for FtwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtwError::InvalidLayout { working, spare } => {
                write!(f, "invalid working block {working} / spare block {spare}")
            }
            FtwError::WorkingBlockTooSmall(size) => write!(f, "working block of {size:#x} bytes is too small"),
            FtwError::ReservedBlock(lba) => write!(f, "block {lba} is reserved for fault tolerant write"),
            FtwError::OutOfRange { lba, offset, length } => {
                write!(f, "write [{offset:#x}, +{length:#x}) does not fit in block {lba}")
            }
            FtwError::Malformed => write!(f, "malformed write queue entry"),
            FtwError::Device(err) => write!(f, "flash device error: {err:?}"),
        }
    }
}

impl From<EfiError> for FtwError {
    fn from(value: EfiError) -> Self {
        FtwError::Device(value)
    }
}

impl From<FtwError> for EfiError {
    fn from(value: FtwError) -> Self {
        match value {
            FtwError::InvalidLayout { .. } | FtwError::ReservedBlock(_) | FtwError::OutOfRange { .. } => {
                EfiError::InvalidParameter
            }
            FtwError::WorkingBlockTooSmall(_) => EfiError::BadBufferSize,
            FtwError::Malformed => EfiError::VolumeCorrupted,
            FtwError::Device(err) => err,
        }
    }
}

/// What [`FaultTolerantWrite::open`] did with a write it found interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The staged block was copied to block `lba`.
    Completed { lba: u64 },
    /// The write stopped before its spare block was staged. The target was never touched.
    Abandoned,
}

fn encode<T>(value: T, size: usize) -> Result<Vec<u8>, FtwError>
where
    T: TryIntoCtx<Endian, Error = scroll::Error>,
{
    let mut bytes = vec![0u8; size];
    bytes.pwrite_with(value, 0, LE).map_err(|_| FtwError::Malformed)?;
    Ok(bytes)
}

fn decode<'a, T>(bytes: &'a [u8]) -> Result<T, FtwError>
where
    T: TryFromCtx<'a, Endian, Error = scroll::Error>,
{
    bytes.pread_with(0, LE).map_err(|_| FtwError::Malformed)
}

fn header_crc(header: &WorkingBlockHeader) -> Result<u32, FtwError> {
    let blank = WorkingBlockHeader { crc: u32::MAX, state: ERASED_BYTE, ..*header };
    Ok(crc32fast::hash(&encode(blank, WorkingBlockHeader::SIZE)?))
}

pub struct FaultTolerantWrite<F> {
    flash: F,
    working_lba: usize,
    spare_lba: usize,
    next_slot: usize,
    recovered: Option<Recovery>,
}

impl<F: NorFlash> FaultTolerantWrite<F> {
    /// Take over `flash`, formatting the working block if it is not valid and finishing any interrupted write.
    pub fn open(flash: F, working_lba: usize, spare_lba: usize) -> Result<Self, FtwError> {
        if working_lba == spare_lba || flash.lba_info(working_lba).is_err() || flash.lba_info(spare_lba).is_err() {
            return Err(FtwError::InvalidLayout { working: working_lba, spare: spare_lba });
        }
        if flash.block_size() < WorkingBlockHeader::SIZE + SLOT_SIZE {
            return Err(FtwError::WorkingBlockTooSmall(flash.block_size()));
        }

        let mut ftw = Self { flash, working_lba, spare_lba, next_slot: 0, recovered: None };
        if ftw.working_block_valid()? {
            ftw.recover()?;
        } else {
            log::warn!(target: "pi_ftw", "working block {working_lba} is not valid, formatting it");
            ftw.format_working_block()?;
        }
        Ok(ftw)
    }

    pub fn working_lba(&self) -> usize {
        self.working_lba
    }

    pub fn spare_lba(&self) -> usize {
        self.spare_lba
    }

    /// The interrupted write found by [`open`](Self::open), if there was one.
    pub fn recovered(&self) -> Option<Recovery> {
        self.recovered
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn block_offset(&self, lba: usize) -> usize {
        lba * self.flash.block_size()
    }

    fn slot_count(&self) -> usize {
        (self.flash.block_size() - WorkingBlockHeader::SIZE) / SLOT_SIZE
    }

    fn slot_offset(&self, slot: usize) -> usize {
        self.block_offset(self.working_lba) + WorkingBlockHeader::SIZE + slot * SLOT_SIZE
    }

    fn clear_bits(&mut self, offset: usize, bits: u8) -> Result<(), FtwError> {
        self.flash.program(offset, &[!bits])?;
        Ok(())
    }

    fn working_block_valid(&self) -> Result<bool, FtwError> {
        let mut bytes = [0u8; WorkingBlockHeader::SIZE];
        self.flash.read(self.block_offset(self.working_lba), &mut bytes)?;
        let header: WorkingBlockHeader = decode(&bytes)?;
        let queue_size = (self.flash.block_size() - WorkingBlockHeader::SIZE) as u64;
        Ok(header.signature() == WORKING_BLOCK_SIGNATURE_GUID
            && header.state & working_block_state::VALID == 0
            && header.state & working_block_state::INVALID != 0
            && header.write_queue_size == queue_size
            && header.crc == header_crc(&header)?)
    }

    fn format_working_block(&mut self) -> Result<(), FtwError> {
        self.flash.erase_block(self.working_lba)?;
        let mut header = WorkingBlockHeader {
            signature: *WORKING_BLOCK_SIGNATURE_GUID.as_bytes(),
            crc: u32::MAX,
            state: ERASED_BYTE,
            reserved: [ERASED_BYTE; 3],
            write_queue_size: (self.flash.block_size() - WorkingBlockHeader::SIZE) as u64,
        };
        header.crc = header_crc(&header)?;
        let base = self.block_offset(self.working_lba);
        self.flash.program(base, &encode(header, WorkingBlockHeader::SIZE)?)?;
        self.clear_bits(base + WorkingBlockHeader::STATE_OFFSET, working_block_state::VALID)?;
        self.next_slot = 0;
        Ok(())
    }

    /// Find the end of the queue and settle the write that was in flight, if any.
    fn recover(&mut self) -> Result<(), FtwError> {
        self.next_slot = self.slot_count();
        for slot in 0..self.slot_count() {
            let offset = self.slot_offset(slot);
            let mut raw = [0u8; SLOT_SIZE];
            self.flash.read(offset, &mut raw)?;
            if raw.iter().all(|byte| *byte == ERASED_BYTE) {
                self.next_slot = slot;
                break;
            }
            let header: WriteHeader = decode(&raw)?;
            if header.state & write_header_state::COMPLETE != 0 {
                let outcome = self.finish_interrupted(offset, &header, &raw[WriteHeader::SIZE..])?;
                self.recovered = Some(outcome);
            }
        }
        Ok(())
    }

    fn finish_interrupted(&mut self, slot: usize, header: &WriteHeader, raw: &[u8]) -> Result<Recovery, FtwError> {
        let record: WriteRecord = decode(raw)?;
        let allocated = header.state & (write_header_state::HEADER_ALLOCATED | write_header_state::WRITES_ALLOCATED);
        let target = usize::try_from(record.lba)
            .ok()
            .filter(|lba| *lba != self.working_lba && *lba != self.spare_lba && self.flash.lba_info(*lba).is_ok());

        let outcome = match target {
            Some(lba) if allocated == 0 && record.state & write_record_state::SPARE_COMPLETE == 0 => {
                if record.state & write_record_state::DESTINATION_COMPLETE != 0 {
                    self.copy_spare_to(lba)?;
                    self.clear_bits(slot + WriteHeader::SIZE, write_record_state::DESTINATION_COMPLETE)?;
                }
                log::info!(target: "pi_ftw", "completed interrupted write to block {lba}");
                Recovery::Completed { lba: record.lba }
            }
            _ => {
                log::warn!(target: "pi_ftw", "dropped a write interrupted before its spare block was staged");
                Recovery::Abandoned
            }
        };
        self.clear_bits(slot, write_header_state::COMPLETE)?;
        Ok(outcome)
    }

    fn copy_spare_to(&mut self, lba: usize) -> Result<(), FtwError> {
        let mut block = vec![0u8; self.flash.block_size()];
        self.flash.read(self.block_offset(self.spare_lba), &mut block)?;
        self.flash.erase_block(lba)?;
        self.flash.program(self.block_offset(lba), &block)?;
        Ok(())
    }

    pub fn read(&self, lba: usize, offset: usize, buffer: &mut [u8]) -> Result<(), FtwError> {
        self.check_target(lba, offset, buffer.len())?;
        self.flash.read(self.block_offset(lba) + offset, buffer)?;
        Ok(())
    }

    fn check_target(&self, lba: usize, offset: usize, length: usize) -> Result<(), FtwError> {
        if lba == self.working_lba || lba == self.spare_lba {
            return Err(FtwError::ReservedBlock(lba));
        }
        self.flash.lba_info(lba)?;
        match offset.checked_add(length) {
            Some(end) if end <= self.flash.block_size() => Ok(()),
            _ => Err(FtwError::OutOfRange { lba, offset, length }),
        }
    }

    /// Replace `data.len()` bytes at `offset` in block `lba`.
    pub fn write(&mut self, lba: usize, offset: usize, data: &[u8]) -> Result<(), FtwError> {
        self.check_target(lba, offset, data.len())?;
        if self.next_slot == self.slot_count() {
            log::info!(target: "pi_ftw", "write queue full, reclaiming working block {}", self.working_lba);
            self.format_working_block()?;
        }
        let slot = self.slot_offset(self.next_slot);
        let record_offset = slot + WriteHeader::SIZE;
        self.next_slot += 1;

        let header = WriteHeader {
            state: ERASED_BYTE,
            reserved: [ERASED_BYTE; 3],
            caller_id: [0; 16],
            reserved2: [ERASED_BYTE; 4],
            number_of_writes: 1,
            private_data_size: 0,
        };
        self.flash.program(slot, &encode(header, WriteHeader::SIZE)?)?;
        self.clear_bits(slot, write_header_state::HEADER_ALLOCATED)?;
        let record = WriteRecord {
            state: ERASED_BYTE,
            reserved: [ERASED_BYTE; 7],
            index: 0,
            lba: lba as u64,
            offset: offset as u64,
            length: data.len() as u64,
            relative_offset: 0,
        };
        self.flash.program(record_offset, &encode(record, WriteRecord::SIZE)?)?;
        self.clear_bits(slot, write_header_state::WRITES_ALLOCATED)?;

        let mut block = vec![0u8; self.flash.block_size()];
        self.flash.read(self.block_offset(lba), &mut block)?;
        block[offset..offset + data.len()].copy_from_slice(data);
        self.flash.erase_block(self.spare_lba)?;
        self.flash.program(self.block_offset(self.spare_lba), &block)?;
        self.clear_bits(record_offset, write_record_state::SPARE_COMPLETE)?;

        self.copy_spare_to(lba)?;
        self.clear_bits(record_offset, write_record_state::DESTINATION_COMPLETE)?;
        self.clear_bits(slot, write_header_state::COMPLETE)?;
        log::debug!(target: "pi_ftw", "wrote {:#x} bytes at block {lba} offset {offset:#x}", data.len());
        Ok(())
    }
}

impl<F> fmt::Debug for FaultTolerantWrite<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultTolerantWrite")
            .field("working_lba", &self.working_lba)
            .field("spare_lba", &self.spare_lba)
            .field("next_slot", &self.next_slot)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nor::{MemoryFlash, MockNorFlash};

    const BLOCK: usize = 0x200;
    const WORKING: usize = 6;
    const SPARE: usize = 7;
    const TARGET: usize = 2;

    /// Flash that loses power after `budget` program or erase operations.
    struct PowerCut {
        inner: MemoryFlash,
        budget: usize,
    }

    impl PowerCut {
        fn spend(&mut self) -> Result<(), EfiError> {
            if self.budget == 0 {
                return Err(EfiError::DeviceError);
            }
            self.budget -= 1;
            Ok(())
        }
    }

    impl NorFlash for PowerCut {
        fn block_size(&self) -> usize {
            self.inner.block_size()
        }

        fn block_count(&self) -> usize {
            self.inner.block_count()
        }

        fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<(), EfiError> {
            self.inner.read(offset, buffer)
        }

        fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), EfiError> {
            self.spend()?;
            self.inner.program(offset, data)
        }

        fn erase_block(&mut self, lba: usize) -> Result<(), EfiError> {
            self.spend()?;
            self.inner.erase_block(lba)
        }
    }

    fn formatted() -> MemoryFlash {
        let mut flash = MemoryFlash::new(BLOCK, 8);
        flash.program(TARGET * BLOCK, &[0x11; BLOCK]).unwrap();
        FaultTolerantWrite::open(flash, WORKING, SPARE).unwrap().into_inner()
    }

    fn target_block(flash: &MemoryFlash) -> Vec<u8> {
        flash.as_bytes()[TARGET * BLOCK..][..BLOCK].to_vec()
    }

    #[test]
    fn open_formats_a_blank_working_block() {
        let flash = formatted();
        let header: WorkingBlockHeader = flash.as_bytes()[WORKING * BLOCK..].pread_with(0, LE).unwrap();
        assert_eq!(header.signature(), WORKING_BLOCK_SIGNATURE_GUID);
        assert_eq!(header.state, !working_block_state::VALID);
        assert_eq!(header.crc, header_crc(&header).unwrap());

        let reopened = FaultTolerantWrite::open(flash.clone(), WORKING, SPARE).unwrap();
        assert_eq!(reopened.recovered(), None);
        assert_eq!(reopened.into_inner(), flash);
    }

    #[test]
    fn corrupt_header_is_reformatted() {
        let mut flash = formatted();
        flash.program(WORKING * BLOCK + WorkingBlockHeader::CRC_OFFSET, &[0x00]).unwrap();
        let ftw = FaultTolerantWrite::open(flash, WORKING, SPARE).unwrap();
        let header: WorkingBlockHeader = ftw.flash().as_bytes()[WORKING * BLOCK..].pread_with(0, LE).unwrap();
        assert_eq!(header.crc, header_crc(&header).unwrap());
    }

    #[test]
    fn write_replaces_only_the_given_range() {
        let mut ftw = FaultTolerantWrite::open(formatted(), WORKING, SPARE).unwrap();
        ftw.write(TARGET, 0x10, &[0xA0, 0xA1, 0xA2]).unwrap();

        let mut bytes = [0u8; 5];
        ftw.read(TARGET, 0x0F, &mut bytes).unwrap();
        assert_eq!(bytes, [0x11, 0xA0, 0xA1, 0xA2, 0x11]);
    }

    #[test]
    fn bad_targets_are_rejected() {
        let mut ftw = FaultTolerantWrite::open(formatted(), WORKING, SPARE).unwrap();
        assert_eq!(ftw.write(SPARE, 0, &[0]), Err(FtwError::ReservedBlock(SPARE)));
        let overflow = FtwError::OutOfRange { lba: TARGET, offset: BLOCK - 1, length: 2 };
        assert_eq!(ftw.write(TARGET, BLOCK - 1, &[0, 0]), Err(overflow));
        assert_eq!(ftw.write(8, 0, &[0]), Err(FtwError::Device(EfiError::InvalidParameter)));
        assert_eq!(EfiError::from(FtwError::ReservedBlock(SPARE)), EfiError::InvalidParameter);

        let flash = MemoryFlash::new(BLOCK, 8);
        assert!(matches!(FaultTolerantWrite::open(flash, 3, 3), Err(FtwError::InvalidLayout { .. })));
        let small = MemoryFlash::new(0x40, 8);
        assert_eq!(FaultTolerantWrite::open(small, 0, 1).err(), Some(FtwError::WorkingBlockTooSmall(0x40)));
    }

    #[test]
    fn full_queue_is_reclaimed() {
        let mut ftw = FaultTolerantWrite::open(formatted(), WORKING, SPARE).unwrap();
        let writes = ftw.slot_count() * 2 + 1;
        for n in 0..writes {
            ftw.write(TARGET, n, &[n as u8]).unwrap();
        }
        let mut bytes = vec![0u8; writes];
        ftw.read(TARGET, 0, &mut bytes).unwrap();
        assert!(bytes.iter().enumerate().all(|(n, byte)| *byte == n as u8));

        let reopened = FaultTolerantWrite::open(ftw.into_inner(), WORKING, SPARE).unwrap();
        assert_eq!(reopened.recovered(), None);
        assert_eq!(reopened.next_slot, 1);
    }

    #[test]
    fn power_loss_leaves_old_or_new_contents() {
        let old = vec![0x11u8; BLOCK];
        let mut new = old.clone();
        new[0x20..0x24].copy_from_slice(b"NEW!");

        let mut budget = 0;
        loop {
            let mut ftw = FaultTolerantWrite::open(PowerCut { inner: formatted(), budget }, WORKING, SPARE).unwrap();
            let finished = ftw.write(TARGET, 0x20, b"NEW!").is_ok();

            let reopened = FaultTolerantWrite::open(ftw.into_inner().inner, WORKING, SPARE).unwrap();
            let contents = target_block(reopened.flash());
            match reopened.recovered() {
                Some(Recovery::Completed { lba }) => {
                    assert_eq!(lba, TARGET as u64);
                    assert_eq!(contents, new, "budget {budget}");
                }
                Some(Recovery::Abandoned) => assert_eq!(contents, old, "budget {budget}"),
                None if finished => assert_eq!(contents, new, "budget {budget}"),
                None => assert_eq!(contents, old, "budget {budget}"),
            }

            // The store keeps working after recovery.
            let mut ftw = reopened;
            ftw.write(TARGET, 0, &[0x22]).unwrap();

            if finished {
                break;
            }
            budget += 1;
        }
        assert_eq!(budget, 11);
    }

    #[test]
    fn device_errors_propagate() {
        let mut flash = MockNorFlash::new();
        flash.expect_block_size().return_const(BLOCK);
        flash.expect_lba_info().returning(|_| Ok((BLOCK, 1)));
        flash.expect_read().returning(|_, _| Err(EfiError::DeviceError));
        assert_eq!(FaultTolerantWrite::open(flash, 0, 1).err(), Some(FtwError::Device(EfiError::DeviceError)));
    }
}
