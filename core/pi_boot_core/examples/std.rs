//! Boot Core STD Binary
//!
//! Boots an in-memory platform from SEC hand-off to runtime: one PEIM discovers memory and publishes the DXE volume,
//! DXE drivers record settings in a flash variable store, and a lock driver installs SMM ready-to-lock.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg(feature = "std")]

use std::sync::Arc;

use pi_boot_core::{
    capabilities::{BuiltinImages, NullMmExecutor, PatternMemoryTest, RecordedReset},
    BootServices, CoreConfig, DxeCore, FvImage, PeiCore, PeiServices, SecHandoff,
};
use pi_ffs::{
    file::File,
    section::{Section, SectionHeader},
    volume::Volume,
};
use pi_flash::{MemoryFlash, VariableStore};
use pi_internal_depex::{encode, push, Opcode};
use pi_sdk::{
    error::{EfiError, Result},
    pi::{
        boot_mode,
        fw_fs::{file::r#type as file_type, fv::BlockMapEntry, section::r#type as section_type},
        guids::{MEMORY_DISCOVERED_PPI, SMM_READY_TO_LOCK_PROTOCOL},
        variable::attributes,
    },
};
use r_efi::efi;

static LOGGER: pi_sdk::log::SerialLogger<pi_sdk::serial::Terminal> = pi_sdk::log::SerialLogger::new(
    pi_sdk::log::Format::Standard,
    &[("pi_depex", log::LevelFilter::Info), ("pi_hob", log::LevelFilter::Info)],
    log::LevelFilter::Trace,
    pi_sdk::serial::Terminal {},
);

const TEMP_RAM: u64 = 0xFEF0_0000;
const TEMP_RAM_SIZE: usize = 0x1_0000;
const MEMORY: u64 = 0x8000_0000;
const MEMORY_SIZE: u64 = 0x4_0000;
const PEI_FV: u64 = 0xFFF0_0000;
const DXE_FV: u64 = 0xFF00_0000;
const FLASH_BLOCK: usize = 0x1000;

const fn guid(tag: u8) -> efi::Guid {
    efi::Guid::from_fields(0x4f0a_91c3, 0x2d77, 0x4b18, 0x9e, tag, &[0x36, 0x0c, 0x5b, 0xa2, 0x71, tag])
}

const MEMORY_PEIM: efi::Guid = guid(0x01);
const PLATFORM_PEIM: efi::Guid = guid(0x02);
const CONSOLE_DRIVER: efi::Guid = guid(0x10);
const SETUP_DRIVER: efi::Guid = guid(0x11);
const LOCK_DRIVER: efi::Guid = guid(0x12);
const CONSOLE_PROTOCOL: efi::Guid = guid(0x20);
const PLATFORM_VENDOR: efi::Guid = guid(0x30);

fn module(name: efi::Guid, r#type: u8, depex_type: u8, depex: Option<&[Opcode]>) -> Result<File> {
    let mut file = File::new(name, r#type);
    if let Some(depex) = depex {
        let section = Section::new_from_header_with_data(SectionHeader::Standard(depex_type, 0), encode(depex))?;
        file.sections_mut().push(section);
    }
    let image = Section::new_from_header_with_data(SectionHeader::Standard(section_type::PE32, 0), b"MZ".to_vec())?;
    file.sections_mut().push(image);
    Ok(file)
}

fn volume(base: u64, files: Vec<File>) -> Result<FvImage> {
    let mut volume = Volume::new(vec![BlockMapEntry { num_blocks: 16, length: 0x1000 }]);
    volume.files_mut().extend(files);
    Ok(FvImage::new(base, volume.serialize()?))
}

fn main() -> Result<()> {
    if log::set_logger(&LOGGER).map(|()| log::set_max_level(log::LevelFilter::Trace)).is_err() {
        log::warn!("Global logger has already been set.");
    }

    let config = CoreConfig::default().with_hob_capacity(0x8000).with_cpu_count(1);
    let reset = Arc::new(RecordedReset::new());

    let after_memory = [push(&MEMORY_DISCOVERED_PPI), Opcode::End];
    let after_console = [push(&CONSOLE_PROTOCOL), Opcode::End];
    let pei_fv = volume(
        PEI_FV,
        vec![
            module(MEMORY_PEIM, file_type::PEIM, section_type::PEI_DEPEX, None)?,
            module(PLATFORM_PEIM, file_type::PEIM, section_type::PEI_DEPEX, Some(&after_memory))?,
        ],
    )?;
    let dxe_fv = volume(
        DXE_FV,
        vec![
            module(CONSOLE_DRIVER, file_type::DRIVER, section_type::DXE_DEPEX, None)?,
            module(SETUP_DRIVER, file_type::DRIVER, section_type::DXE_DEPEX, Some(&after_console))?,
            module(LOCK_DRIVER, file_type::DRIVER, section_type::DXE_DEPEX, Some(&after_console))?,
        ],
    )?;

    let pei_images = BuiltinImages::new()
        .with(MEMORY_PEIM, |services: &mut PeiServices| services.install_pei_memory(MEMORY, MEMORY_SIZE))
        .with(PLATFORM_PEIM, move |services: &mut PeiServices| services.install_fv(dxe_fv.clone()));
    let sec = SecHandoff {
        boot_mode: boot_mode::BOOT_WITH_FULL_CONFIGURATION,
        temp_ram_base: TEMP_RAM,
        temp_ram_size: TEMP_RAM_SIZE,
        boot_fvs: vec![pei_fv],
    };
    let handoff = PeiCore::new(sec, config.clone())?
        .with_image_loader(pei_images)
        .with_memory_test(PatternMemoryTest::new(MEMORY, vec![0u8; MEMORY_SIZE as usize]))
        .with_platform_reset(reset.clone())
        .run()?;
    log::info!("PEI hand-off:\n{}", handoff.hobs);

    let dxe_images = BuiltinImages::new()
        .with(CONSOLE_DRIVER, |services: &mut BootServices| services.install_protocol(CONSOLE_PROTOCOL, Arc::new(())))
        .with(SETUP_DRIVER, |services: &mut BootServices| {
            let access = attributes::NON_VOLATILE | attributes::BOOTSERVICE_ACCESS | attributes::RUNTIME_ACCESS;
            services.runtime_mut().set_variable("BootOrder", &PLATFORM_VENDOR, access, &[0x00, 0x00])
        })
        .with(LOCK_DRIVER, |services: &mut BootServices| {
            services.install_protocol(SMM_READY_TO_LOCK_PROTOCOL, Arc::new(()))
        });
    let variables = VariableStore::open_or_format(MemoryFlash::new(FLASH_BLOCK, 4), 0, 2 * FLASH_BLOCK)?;

    let mut dxe = DxeCore::new(handoff, config, reset.clone())?
        .with_mm(Arc::new(NullMmExecutor))?
        .with_variable_storage(Box::new(variables))
        .with_image_loader(dxe_images);
    let report = dxe.run_to_bds()?;
    log::info!("DXE dispatched {} drivers, {} failed", report.dispatched.len(), report.failed.len());

    dxe.exit_boot_services().map_err(EfiError::from)?;
    let (_, boot_order) = dxe.services().runtime().get_variable("BootOrder", &PLATFORM_VENDOR)?;
    log::info!("runtime reached, BootOrder = {boot_order:02x?}, resets requested: {:?}", reset.requests());
    Ok(())
}
