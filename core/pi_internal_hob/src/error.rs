//! HOB list errors.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt;

use pi_sdk::error::EfiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HobError {
    /// The record and a new end marker do not fit in the remaining space.
    OutOfResources { requested: usize, available: usize },
    /// The record length would not fit the 16-bit header field.
    RecordTooLarge(usize),
    /// The region cannot hold a PHIT and an end marker.
    CapacityTooSmall(usize),
    /// The first record is not a PHIT.
    MissingHandoff,
    /// No end marker inside the region.
    MissingEnd,
    /// A record length is zero, unaligned, or runs past the region.
    CorruptRecord { offset: usize },
    /// The PHIT end-of-list address disagrees with the walked list.
    EndMismatch { expected: u64, found: u64 },
    /// An offset that does not name a record in this list.
    InvalidOffset(usize),
}

impl fmt::Display for HobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HobError::OutOfResources { requested, available } => {
                write!(f, "HOB space exhausted: {requested:#x} bytes requested, {available:#x} available")
            }
            HobError::RecordTooLarge(size) => write!(f, "HOB record of {size:#x} bytes exceeds the length field"),
            HobError::CapacityTooSmall(size) => write!(f, "HOB region of {size:#x} bytes is too small"),
            HobError::MissingHandoff => write!(f, "HOB list does not start with a PHIT"),
            HobError::MissingEnd => write!(f, "HOB list has no end marker"),
            HobError::CorruptRecord { offset } => write!(f, "corrupt HOB record at offset {offset:#x}"),
            HobError::EndMismatch { expected, found } => {
                write!(f, "PHIT end of list {expected:#x} does not match end marker at {found:#x}")
            }
            HobError::InvalidOffset(offset) => write!(f, "no HOB record at offset {offset:#x}"),
        }
    }
}

impl From<HobError> for EfiError {
    fn from(value: HobError) -> Self {
        match value {
            HobError::OutOfResources { .. } | HobError::CapacityTooSmall(_) => EfiError::OutOfResources,
            HobError::RecordTooLarge(_) => EfiError::BadBufferSize,
            HobError::InvalidOffset(_) => EfiError::InvalidParameter,
            HobError::MissingHandoff
            | HobError::MissingEnd
            | HobError::CorruptRecord { .. }
            | HobError::EndMismatch { .. } => EfiError::CompromisedData,
        }
    }
}
