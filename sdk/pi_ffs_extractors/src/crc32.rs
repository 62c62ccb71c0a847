//! Module for CRC32 GUID-defined sections.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use pi_ffs::{
    section::{Section, SectionExtractor, SectionHeader},
    FirmwareFileSystemError,
};
use pi_sdk::pi::fw_fs::guid;

/// Verifies the CRC32 carried in the GUID-specific header bytes and returns the payload unchanged.
#[derive(Default, Clone, Copy)]
pub struct Crc32SectionExtractor;

impl SectionExtractor for Crc32SectionExtractor {
    fn extract(&self, section: &Section) -> Result<Vec<u8>, FirmwareFileSystemError> {
        let SectionHeader::GuidDefined(guid_header, crc_header, _) = section.header() else {
            return Err(FirmwareFileSystemError::Unsupported);
        };
        if guid_header.section_definition_guid() != guid::CRC32_SECTION {
            return Err(FirmwareFileSystemError::Unsupported);
        }

        let crc32 = crc_header
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or(FirmwareFileSystemError::DataCorrupt)?;
        let content = section.content();
        if crc32 != crc32fast::hash(content) {
            log::warn!(target: "pi_ffs", "CRC32 section failed verification: expected {:#x}", crc32);
            Err(FirmwareFileSystemError::DataCorrupt)?;
        }
        Ok(content.to_vec())
    }
}
