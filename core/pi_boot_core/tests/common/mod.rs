//! Firmware volume construction for the boot flow tests.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![allow(dead_code)]

use pi_boot_core::FvImage;
use pi_ffs::{
    file::File,
    section::{Section, SectionHeader},
    volume::Volume,
};
use pi_internal_depex::{encode, Opcode};
use pi_sdk::pi::fw_fs::{file::r#type as file_type, fv::BlockMapEntry, section::r#type as section_type};
use r_efi::efi;

pub const TEMP_RAM: u64 = 0xFEF0_0000;
pub const TEMP_RAM_SIZE: usize = 0x1_0000;
pub const MEMORY: u64 = 0x8000_0000;
pub const MEMORY_SIZE: u64 = 0x10_0000;

pub fn guid(tag: u8) -> efi::Guid {
    efi::Guid::from_fields(0x9e2c_7a10, 0x4d3b, 0x4f61, 0xa0, tag, &[0x5c, 0x31, 0x77, 0x08, 0xe2, tag])
}

fn section(r#type: u8, data: Vec<u8>) -> Section {
    Section::new_from_header_with_data(SectionHeader::Standard(r#type, 0), data).unwrap()
}

fn module(name: efi::Guid, r#type: u8, depex_type: u8, depex: Option<&[Opcode]>) -> File {
    let mut file = File::new(name, r#type);
    if let Some(depex) = depex {
        file.sections_mut().push(section(depex_type, encode(depex)));
    }
    file.sections_mut().push(section(section_type::PE32, vec![0x4d, 0x5a, 0x90, 0x00]));
    file
}

pub fn peim(name: efi::Guid, depex: Option<&[Opcode]>) -> File {
    module(name, file_type::PEIM, section_type::PEI_DEPEX, depex)
}

pub fn dxe_driver(name: efi::Guid, depex: Option<&[Opcode]>) -> File {
    module(name, file_type::DRIVER, section_type::DXE_DEPEX, depex)
}

pub fn volume(base: u64, files: Vec<File>) -> FvImage {
    let mut volume = Volume::new(vec![BlockMapEntry { num_blocks: 32, length: 0x1000 }]);
    volume.files_mut().extend(files);
    FvImage::new(base, volume.serialize().unwrap())
}

/// Copy of `fv` with the first name byte of file `name` flipped, so its header checksum no longer matches.
pub fn with_damaged_file(fv: &FvImage, name: &efi::Guid) -> FvImage {
    let volume = fv.volume().unwrap();
    let file = volume.find_file(name).unwrap();
    let offset = file.data().as_ptr() as usize - fv.bytes().as_ptr() as usize;
    let mut bytes = fv.bytes().to_vec();
    bytes[offset] ^= 0x55;
    FvImage::new(fv.base(), bytes)
}
