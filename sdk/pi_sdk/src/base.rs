//! Base helpers: size constants and alignment arithmetic.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::error::{EfiError, Result};

/// Size of a UEFI page in bytes.
pub const UEFI_PAGE_SIZE: usize = 0x1000;

pub const SIZE_4KB: usize = 0x1000;
pub const SIZE_64KB: usize = 0x10000;
pub const SIZE_1MB: usize = 0x100000;
pub const SIZE_16MB: usize = 0x1000000;

/// Aligns `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two. Fails with [`EfiError::InvalidParameter`] on a bad alignment and with
/// [`EfiError::BufferTooSmall`] when the result would overflow.
pub fn align_up(value: u64, alignment: u64) -> Result<u64> {
    if !alignment.is_power_of_two() {
        return Err(EfiError::InvalidParameter);
    }
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask).ok_or(EfiError::BufferTooSmall)
}

/// Aligns `value` down to the previous multiple of `alignment`.
pub fn align_down(value: u64, alignment: u64) -> Result<u64> {
    if !alignment.is_power_of_two() {
        return Err(EfiError::InvalidParameter);
    }
    Ok(value & !(alignment - 1))
}

/// `usize` flavour of [`align_up`] for offsets into byte buffers.
pub fn align_up_usize(value: usize, alignment: usize) -> Result<usize> {
    align_up(value as u64, alignment as u64).and_then(|v| usize::try_from(v).map_err(|_| EfiError::BufferTooSmall))
}

/// Returns the number of pages required to hold `size` bytes.
pub const fn size_to_pages(size: usize) -> usize {
    size.div_ceil(UEFI_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(0, 8), Ok(0));
        assert_eq!(align_up(1, 8), Ok(8));
        assert_eq!(align_up(17, 8), Ok(24));
        assert_eq!(align_up(24, 8), Ok(24));
        assert_eq!(align_up(5, 3), Err(EfiError::InvalidParameter));
        assert_eq!(align_up(u64::MAX, 8), Err(EfiError::BufferTooSmall));
    }

    #[test]
    fn align_down_and_pages() {
        assert_eq!(align_down(0x1fff, 0x1000), Ok(0x1000));
        assert_eq!(align_up_usize(9, 4), Ok(12));
        assert_eq!(size_to_pages(1), 1);
        assert_eq!(size_to_pages(UEFI_PAGE_SIZE + 1), 2);
    }
}
