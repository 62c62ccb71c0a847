//! A section extractor that handles nothing.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use pi_ffs::{
    section::{Section, SectionExtractor},
    FirmwareFileSystemError,
};

/// Reports every section as unsupported, so only unencoded encapsulations get expanded.
#[derive(Default, Clone, Copy)]
pub struct NullSectionExtractor;

impl SectionExtractor for NullSectionExtractor {
    fn extract(&self, _section: &Section) -> Result<alloc::vec::Vec<u8>, FirmwareFileSystemError> {
        Err(FirmwareFileSystemError::Unsupported)
    }
}
