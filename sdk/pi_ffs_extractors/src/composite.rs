//! Module for a composite of the feature-enabled extractors.
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

#[cfg(feature = "brotli")]
use crate::BrotliSectionExtractor;
#[cfg(feature = "crc32")]
use crate::Crc32SectionExtractor;
#[cfg(feature = "lzma")]
use crate::LzmaSectionExtractor;

/// Tries each enabled codec in turn; the first one that does not report `Unsupported` decides the result.
#[derive(Default, Clone, Copy)]
pub struct CompositeSectionExtractor {
    #[cfg(feature = "brotli")]
    brotli: BrotliSectionExtractor,
    #[cfg(feature = "crc32")]
    crc32: Crc32SectionExtractor,
    #[cfg(feature = "lzma")]
    lzma: LzmaSectionExtractor,
}

impl SectionExtractor for CompositeSectionExtractor {
    fn extract(&self, _section: &Section) -> Result<alloc::vec::Vec<u8>, FirmwareFileSystemError> {
        #[cfg(feature = "brotli")]
        {
            match self.brotli.extract(_section) {
                Err(FirmwareFileSystemError::Unsupported) => (),
                result => return result,
            }
        }
        #[cfg(feature = "crc32")]
        {
            match self.crc32.extract(_section) {
                Err(FirmwareFileSystemError::Unsupported) => (),
                result => return result,
            }
        }
        #[cfg(feature = "lzma")]
        {
            match self.lzma.extract(_section) {
                Err(FirmwareFileSystemError::Unsupported) => (),
                result => return result,
            }
        }
        Err(FirmwareFileSystemError::Unsupported)
    }
}
