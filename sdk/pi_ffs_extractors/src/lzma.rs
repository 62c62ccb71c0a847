//! Module for LZMA decompression.
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
use std::io::Cursor;

/// Unpacked size recorded by encoders that stream without knowing the length.
pub const LZMA_UNKNOWN_UNPACKED_SIZE_MAGIC_VALUE: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Length of the `.lzma` header: properties byte, dictionary size, unpacked size.
const LZMA_HEADER_SIZE: usize = 13;

/// Provides decompression for LZMA GUIDed sections.
#[derive(Default, Clone, Copy)]
pub struct LzmaSectionExtractor;

impl SectionExtractor for LzmaSectionExtractor {
    fn extract(&self, section: &Section) -> Result<Vec<u8>, FirmwareFileSystemError> {
        let SectionHeader::GuidDefined(guid_header, _, _) = section.header() else {
            return Err(FirmwareFileSystemError::Unsupported);
        };
        if guid_header.section_definition_guid() != guid::LZMA_SECTION {
            return Err(FirmwareFileSystemError::Unsupported);
        }

        let data = section.content();
        if data.len() < LZMA_HEADER_SIZE {
            Err(FirmwareFileSystemError::DataCorrupt)?;
        }
        let mut unpacked_size = [0u8; 8];
        unpacked_size.copy_from_slice(&data[5..LZMA_HEADER_SIZE]);
        let mut decompressed = match u64::from_le_bytes(unpacked_size) {
            LZMA_UNKNOWN_UNPACKED_SIZE_MAGIC_VALUE => Vec::new(),
            size => Vec::with_capacity(usize::try_from(size).map_err(|_| FirmwareFileSystemError::DataCorrupt)?),
        };
        lzma_rs::lzma_decompress(&mut Cursor::new(data), &mut decompressed).map_err(|err| {
            log::warn!(target: "pi_ffs", "LZMA section failed to decode: {:?}", err);
            FirmwareFileSystemError::DataCorrupt
        })?;
        Ok(decompressed)
    }
}
