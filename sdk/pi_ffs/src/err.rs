//! Error types and conversions for the Firmware File System crate.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt;

use pi_sdk::error::EfiError;
use r_efi::efi;

/// Error definitions for Firmware File System
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareFileSystemError {
    /// A header is malformed, or a size runs past the enclosing buffer.
    InvalidHeader,
    /// The block map structure is invalid.
    InvalidBlockMap,
    /// A parameter provided to a function is invalid.
    InvalidParameter,
    /// The requested operation or feature is unsupported.
    Unsupported,
    /// A file state byte holds an impossible value.
    InvalidState,
    /// A checksum over file data or an encapsulated payload did not match.
    DataCorrupt,
    /// The section has been modified and not yet composed.
    NotComposed,
    /// The section is not a leaf section.
    NotLeaf,
    /// Composing an encapsulation section failed.
    ComposeFailed,
}

impl fmt::Display for FirmwareFileSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<FirmwareFileSystemError> for EfiError {
    fn from(value: FirmwareFileSystemError) -> Self {
        match value {
            FirmwareFileSystemError::InvalidParameter
            | FirmwareFileSystemError::NotComposed
            | FirmwareFileSystemError::NotLeaf => EfiError::InvalidParameter,
            FirmwareFileSystemError::Unsupported => EfiError::Unsupported,
            FirmwareFileSystemError::InvalidHeader
            | FirmwareFileSystemError::InvalidBlockMap
            | FirmwareFileSystemError::InvalidState => EfiError::VolumeCorrupted,
            FirmwareFileSystemError::DataCorrupt => EfiError::CrcError,
            FirmwareFileSystemError::ComposeFailed => EfiError::DeviceError,
        }
    }
}

impl From<FirmwareFileSystemError> for efi::Status {
    fn from(value: FirmwareFileSystemError) -> Self {
        let err: EfiError = value.into();
        err.into()
    }
}

impl From<scroll::Error> for FirmwareFileSystemError {
    fn from(_: scroll::Error) -> Self {
        FirmwareFileSystemError::InvalidHeader
    }
}
