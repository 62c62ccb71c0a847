//! Firmware volumes known to a core, and driver discovery inside them.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{sync::Arc, vec::Vec};
use core::fmt;

use pi_ffs::{file::FileRef, section::SectionExtractor, volume::VolumeRef, FirmwareFileSystemError};
use pi_internal_depex::Depex;
use pi_sdk::{
    guid_fmt,
    pi::fw_fs::{file::r#type as file_type, section::r#type as section_type},
};
use r_efi::efi;

/// A firmware volume image and the address it is mapped at.
#[derive(Clone, PartialEq, Eq)]
pub struct FvImage {
    base: u64,
    bytes: Arc<[u8]>,
}

impl FvImage {
    pub fn new(base: u64, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { base, bytes: bytes.into() }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Validate the header and open the volume.
    pub fn volume(&self) -> Result<VolumeRef<'_>, FirmwareFileSystemError> {
        VolumeRef::new(&self.bytes)
    }

    /// Whether `[base, base + length)` is exactly this image.
    pub fn covers(&self, base: u64, length: u64) -> bool {
        self.base == base && self.len() == length
    }
}

impl fmt::Debug for FvImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FvImage({:#x}, {:#x} bytes)", self.base, self.bytes.len())
    }
}

/// Which files a phase dispatches and where it reads their dependency expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverFilter {
    pub file_types: &'static [u8],
    pub depex_section: u8,
}

impl DriverFilter {
    pub const PEI: DriverFilter = DriverFilter {
        file_types: &[file_type::PEIM, file_type::COMBINED_PEIM_DRIVER],
        depex_section: section_type::PEI_DEPEX,
    };

    pub const DXE: DriverFilter = DriverFilter {
        file_types: &[file_type::DRIVER, file_type::COMBINED_PEIM_DRIVER, file_type::COMBINED_MM_DXE],
        depex_section: section_type::DXE_DEPEX,
    };

    pub fn accepts(&self, file_type_raw: u8) -> bool {
        self.file_types.contains(&file_type_raw)
    }
}

/// A dispatchable file found in a firmware volume.
#[derive(Clone)]
pub struct DriverFile {
    pub name: efi::Guid,
    pub file_type: u8,
    /// `None` when the file carries no dependency section.
    pub depex: Option<Depex>,
    /// Content of the PE32 section, or of the TE section when there is no PE32.
    pub image: Vec<u8>,
}

impl fmt::Debug for DriverFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverFile")
            .field("name", &guid_fmt!(self.name))
            .field("file_type", &self.file_type)
            .field("depex", &self.depex.is_some())
            .field("image", &self.image.len())
            .finish()
    }
}

fn driver_from_file(
    file: &FileRef<'_>,
    extractor: &dyn SectionExtractor,
    filter: &DriverFilter,
) -> Result<Option<DriverFile>, FirmwareFileSystemError> {
    let sections = file.sections_with_extractor(extractor)?;
    let depex = sections
        .iter()
        .find(|section| section.section_type_raw() == filter.depex_section)
        .map(|section| Depex::parse(section.content()));
    let image = [section_type::PE32, section_type::TE]
        .iter()
        .find_map(|wanted| sections.iter().find(|section| section.section_type_raw() == *wanted))
        .map(|section| section.content().to_vec());

    Ok(image.map(|image| DriverFile { name: file.name(), file_type: file.file_type_raw(), depex, image }))
}

/// Collect the files of `fv` that `filter` accepts, in volume order.
///
/// A corrupt volume header yields nothing. A file whose sections cannot be read, or that has no image section, is
/// logged and skipped; the rest of the volume is still scanned.
pub fn discover_drivers(fv: &FvImage, extractor: &dyn SectionExtractor, filter: &DriverFilter) -> Vec<DriverFile> {
    let volume = match fv.volume() {
        Ok(volume) => volume,
        Err(err) => {
            log::error!(target: "pi_dispatcher", "skipping {fv:?}: {err}");
            return Vec::new();
        }
    };

    let mut drivers = Vec::new();
    for file in volume.files() {
        let file = match file {
            Ok(file) => file,
            Err(err) => {
                log::error!(target: "pi_dispatcher", "skipping a corrupt file in {fv:?}: {err}");
                continue;
            }
        };
        if !filter.accepts(file.file_type_raw()) {
            continue;
        }
        match driver_from_file(&file, extractor, filter) {
            Ok(Some(driver)) => {
                log::trace!(target: "pi_dispatcher", "discovered {}", guid_fmt!(driver.name));
                drivers.push(driver);
            }
            Ok(None) => {
                log::warn!(target: "pi_dispatcher", "{} has no image section; skipped", guid_fmt!(file.name()))
            }
            Err(err) => {
                log::error!(target: "pi_dispatcher", "{} is malformed ({err}); skipped", guid_fmt!(file.name()))
            }
        }
    }
    drivers
}
