//! Firmware volume fixtures shared by the unit tests.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use std::vec::Vec;

use pi_ffs::{
    file::File,
    section::{Section, SectionHeader},
    volume::Volume,
};
use pi_internal_depex::{encode, Opcode};
use pi_sdk::pi::fw_fs::{fv::BlockMapEntry, section::r#type as section_type};
use r_efi::efi;

use crate::fv::FvImage;

/// Bytes standing in for a PE32 image.
pub(crate) const IMAGE: [u8; 4] = [0x4d, 0x5a, 0x90, 0x00];

fn section(section_type: u8, data: Vec<u8>) -> Section {
    Section::new_from_header_with_data(SectionHeader::Standard(section_type, 0), data).unwrap()
}

/// A driver file with a PE32 section and, when `depex` is given, a dependency section of type `depex_section`.
pub(crate) fn driver(name: efi::Guid, file_type: u8, depex_section: u8, depex: Option<&[Opcode]>) -> File {
    let mut file = File::new(name, file_type);
    if let Some(depex) = depex {
        file.sections_mut().push(section(depex_section, encode(depex)));
    }
    file.sections_mut().push(section(section_type::PE32, IMAGE.to_vec()));
    file
}

/// Serialize `files` into a 64KB volume mapped at `base`.
pub(crate) fn fv_image(base: u64, files: Vec<File>) -> FvImage {
    let mut volume = Volume::new(std::vec![BlockMapEntry { num_blocks: 16, length: 0x1000 }]);
    volume.files_mut().extend(files);
    FvImage::new(base, volume.serialize().unwrap())
}

/// Copy of `fv` with the first name byte of file `name` flipped, so its header checksum no longer matches.
pub(crate) fn with_damaged_file(fv: &FvImage, name: &efi::Guid) -> FvImage {
    let volume = fv.volume().unwrap();
    let file = volume.find_file(name).unwrap();
    let offset = file.data().as_ptr() as usize - fv.bytes().as_ptr() as usize;
    let mut bytes = fv.bytes().to_vec();
    bytes[offset] ^= 0x55;
    FvImage::new(fv.base(), bytes)
}
