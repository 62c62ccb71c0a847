//! GUID-keyed registry of section extraction handlers.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use pi_ffs::{
    section::{Section, SectionExtractor, SectionHeader},
    FirmwareFileSystemError,
};
use r_efi::efi;

/// Dispatches GUID-defined sections to the handler registered for their definition GUID.
///
/// Handlers are kept in registration order. Registering a GUID that already has a handler replaces that handler
/// in place. A GUID-defined section with no registered handler, and any other section type, is `Unsupported`.
#[derive(Default)]
pub struct GuidedSectionExtractorRegistry {
    handlers: Vec<(efi::Guid, Box<dyn SectionExtractor>)>,
}

impl GuidedSectionExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for sections defined by `guid`.
    pub fn register(&mut self, guid: efi::Guid, handler: Box<dyn SectionExtractor>) {
        match self.handlers.iter_mut().find(|(existing, _)| *existing == guid) {
            Some(entry) => {
                log::info!(target: "pi_ffs", "Replacing section extractor for {}", pi_sdk::guid_fmt!(guid));
                entry.1 = handler;
            }
            None => {
                log::info!(target: "pi_ffs", "Registering section extractor for {}", pi_sdk::guid_fmt!(guid));
                self.handlers.push((guid, handler));
            }
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, guid: efi::Guid, handler: impl SectionExtractor + 'static) -> Self {
        self.register(guid, Box::new(handler));
        self
    }

    /// The registered GUIDs in registration order.
    pub fn guids(&self) -> impl Iterator<Item = &efi::Guid> {
        self.handlers.iter().map(|(guid, _)| guid)
    }

    pub fn is_registered(&self, guid: &efi::Guid) -> bool {
        self.handlers.iter().any(|(existing, _)| existing == guid)
    }

    /// A registry populated with every codec enabled by cargo features.
    pub fn with_default_codecs() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "crc32")]
        {
            registry = registry.with(pi_sdk::pi::fw_fs::guid::CRC32_SECTION, crate::Crc32SectionExtractor);
        }
        #[cfg(feature = "lzma")]
        {
            registry = registry.with(pi_sdk::pi::fw_fs::guid::LZMA_SECTION, crate::LzmaSectionExtractor);
        }
        #[cfg(feature = "brotli")]
        {
            registry = registry.with(pi_sdk::pi::fw_fs::guid::BROTLI_SECTION, crate::BrotliSectionExtractor);
        }
        registry
    }
}

impl SectionExtractor for GuidedSectionExtractorRegistry {
    fn extract(&self, section: &Section) -> Result<Vec<u8>, FirmwareFileSystemError> {
        let SectionHeader::GuidDefined(guid_header, _, _) = section.header() else {
            return Err(FirmwareFileSystemError::Unsupported);
        };
        let guid = guid_header.section_definition_guid();
        match self.handlers.iter().find(|(existing, _)| *existing == guid) {
            Some((_, handler)) => handler.extract(section),
            None => {
                log::debug!(target: "pi_ffs", "No section extractor registered for {}", pi_sdk::guid_fmt!(guid));
                Err(FirmwareFileSystemError::Unsupported)
            }
        }
    }
}

impl fmt::Debug for GuidedSectionExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.guids().map(|guid| pi_sdk::guid_fmt!(guid))).finish()
    }
}
