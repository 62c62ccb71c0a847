//! NOR flash device capability.
//!
//! NOR flash erases to all ones a block at a time, and programming can only clear bits. [`MemoryFlash`] models
//! exactly that: programming a byte stores `old & new`.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{vec, vec::Vec};

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use pi_sdk::{error::EfiError, pi::ftw::ERASED_BYTE};

/// A block-erasable flash device addressed by byte offset.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait NorFlash {
    fn block_size(&self) -> usize;

    fn block_count(&self) -> usize;

    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<(), EfiError>;

    /// Clear the bits of `data` that are zero. Bits that are already zero stay zero.
    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), EfiError>;

    /// Set every byte of block `lba` to `0xFF`.
    fn erase_block(&mut self, lba: usize) -> Result<(), EfiError>;

    /// Block size at `lba` and the number of blocks from `lba` to the end of the device.
    fn lba_info(&self, lba: usize) -> Result<(usize, usize), EfiError> {
        match self.block_count().checked_sub(lba) {
            Some(remaining) if remaining > 0 => Ok((self.block_size(), remaining)),
            _ => Err(EfiError::InvalidParameter),
        }
    }
}

fn check_range(offset: usize, length: usize, size: usize) -> Result<core::ops::Range<usize>, EfiError> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(offset..end),
        _ => {
            log::error!(
                target: "pi_flash",
                "flash access [{offset:#x}, +{length:#x}) is outside the {size:#x} byte device"
            );
            Err(EfiError::InvalidParameter)
        }
    }
}

/// Flash held in RAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFlash {
    block_size: usize,
    bytes: Vec<u8>,
}

impl MemoryFlash {
    /// An erased device of `block_count` blocks.
    pub fn new(block_size: usize, block_count: usize) -> Self {
        Self { block_size, bytes: vec![ERASED_BYTE; block_size * block_count] }
    }

    /// A device holding `bytes`, which must be a whole number of blocks.
    pub fn from_bytes(block_size: usize, bytes: Vec<u8>) -> Result<Self, EfiError> {
        if block_size == 0 || bytes.len() % block_size != 0 {
            return Err(EfiError::InvalidParameter);
        }
        Ok(Self { block_size, bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl NorFlash for MemoryFlash {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> usize {
        self.bytes.len() / self.block_size
    }

    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<(), EfiError> {
        let range = check_range(offset, buffer.len(), self.bytes.len())?;
        buffer.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), EfiError> {
        let range = check_range(offset, data.len(), self.bytes.len())?;
        for (stored, new) in self.bytes[range].iter_mut().zip(data) {
            *stored &= new;
        }
        Ok(())
    }

    fn erase_block(&mut self, lba: usize) -> Result<(), EfiError> {
        let offset = lba.checked_mul(self.block_size).ok_or(EfiError::InvalidParameter)?;
        let range = check_range(offset, self.block_size, self.bytes.len())?;
        self.bytes[range].fill(ERASED_BYTE);
        Ok(())
    }
}

/// A device with no blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFlash;

impl NorFlash for NullFlash {
    fn block_size(&self) -> usize {
        0
    }

    fn block_count(&self) -> usize {
        0
    }

    fn read(&self, _offset: usize, _buffer: &mut [u8]) -> Result<(), EfiError> {
        Err(EfiError::Unsupported)
    }

    fn program(&mut self, _offset: usize, _data: &[u8]) -> Result<(), EfiError> {
        Err(EfiError::Unsupported)
    }

    fn erase_block(&mut self, _lba: usize) -> Result<(), EfiError> {
        Err(EfiError::Unsupported)
    }
}
