//! End-to-end boot: SEC hand-off through PEI, DXE, BDS, and runtime.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
mod common;

use std::sync::{Arc, Mutex};

use common::{dxe_driver, guid, peim, volume, with_damaged_file, MEMORY, MEMORY_SIZE, TEMP_RAM, TEMP_RAM_SIZE};
use pi_boot_core::{
    capabilities::{BuiltinImages, NullMmExecutor, NullReset, PatternMemoryTest, RecordedReset, ResetType},
    BootServices, CoreConfig, DispatchFailure, DxeCore, FatalError, PeiCore, PeiServices, Phase, PhaseError,
    SecHandoff,
};
use pi_internal_depex::{after, before, push, Opcode};
use pi_sdk::{
    error::EfiError,
    pi::{
        boot_mode,
        guids::{END_OF_PEI_PPI, MEMORY_DISCOVERED_PPI, SMM_READY_TO_LOCK_PROTOCOL},
    },
    policy::AssertPolicy,
};
use r_efi::efi;

const DXE_FV_BASE: u64 = 0xFF00_0000;

fn config() -> CoreConfig {
    CoreConfig::default().with_hob_capacity(0x8000).with_assert_policy(AssertPolicy::LogAndContinue)
}

fn sec(files: Vec<pi_ffs::file::File>) -> SecHandoff {
    SecHandoff {
        boot_mode: boot_mode::BOOT_WITH_FULL_CONFIGURATION,
        temp_ram_base: TEMP_RAM,
        temp_ram_size: TEMP_RAM_SIZE,
        boot_fvs: vec![volume(0xFFF0_0000, files)],
    }
}

type Trace = Arc<Mutex<Vec<&'static str>>>;

fn traced<S: 'static>(trace: &Trace, label: &'static str) -> impl Fn(&mut S) -> Result<(), EfiError> + Send + Sync {
    let trace = Arc::clone(trace);
    move |_: &mut S| {
        trace.lock().unwrap().push(label);
        Ok(())
    }
}

#[test]
fn platform_boots_to_runtime() {
    let platform_ppi = guid(0x10);
    let platform_data = guid(0x11);
    let protocol_a = guid(0x20);
    let protocol_b = guid(0x21);
    let (memory_peim, platform_peim) = (guid(0x01), guid(0x02));
    let (driver_a, driver_b, driver_and, driver_after, driver_lock) =
        (guid(0x31), guid(0x32), guid(0x33), guid(0x34), guid(0x35));

    let dxe_fv = volume(
        DXE_FV_BASE,
        vec![
            dxe_driver(driver_after, Some(&[after(&driver_and), Opcode::End])),
            dxe_driver(driver_and, Some(&[push(&protocol_a), push(&protocol_b), Opcode::And, Opcode::End])),
            dxe_driver(driver_b, Some(&[push(&protocol_a), Opcode::End])),
            dxe_driver(driver_a, None),
            dxe_driver(driver_lock, Some(&[push(&protocol_b), Opcode::End])),
        ],
    );

    let trace: Trace = Arc::default();
    let installs_dxe_fv = dxe_fv.clone();
    let pei_images = BuiltinImages::new()
        .with(memory_peim, move |services: &mut PeiServices| {
            services.install_pei_memory(MEMORY, MEMORY_SIZE)?;
            services.install_ppi(platform_ppi, Arc::new(()))
        })
        .with(platform_peim, move |services: &mut PeiServices| {
            services.build_guid_hob(&platform_data, b"board-rev-4")?;
            services.install_fv(installs_dxe_fv.clone())
        });
    let pei_files = vec![
        peim(platform_peim, Some(&[push(&MEMORY_DISCOVERED_PPI), push(&platform_ppi), Opcode::And, Opcode::End])),
        peim(memory_peim, None),
    ];

    let handoff = PeiCore::new(sec(pei_files), config())
        .unwrap()
        .with_image_loader(pei_images)
        .with_memory_test(PatternMemoryTest::new(MEMORY, vec![0u8; MEMORY_SIZE as usize]))
        .run()
        .unwrap();
    assert_eq!(handoff.report.dispatched, vec![memory_peim, platform_peim]);
    assert_eq!(handoff.hobs.base(), MEMORY);

    let board = Arc::new(Mutex::new(Vec::new()));
    let board_seen = Arc::clone(&board);
    let dxe_images = BuiltinImages::new()
        .with(driver_a, {
            let trace = Arc::clone(&trace);
            move |services: &mut BootServices| {
                trace.lock().unwrap().push("a");
                let hob = services.hobs().get_first_guid_hob(&platform_data).ok_or(EfiError::NotFound)?;
                board_seen.lock().unwrap().extend_from_slice(hob.guid_data().unwrap_or_default());
                services.install_protocol(protocol_a, Arc::new(()))
            }
        })
        .with(driver_b, {
            let trace = Arc::clone(&trace);
            move |services: &mut BootServices| {
                trace.lock().unwrap().push("b");
                services.install_protocol(protocol_b, Arc::new(()))
            }
        })
        .with(driver_and, traced(&trace, "and"))
        .with(driver_after, traced(&trace, "after"))
        .with(driver_lock, |services: &mut BootServices| {
            services.install_protocol(SMM_READY_TO_LOCK_PROTOCOL, Arc::new(()))
        });

    let mut dxe = DxeCore::new(handoff, config(), Arc::new(NullReset))
        .unwrap()
        .with_mm(Arc::new(NullMmExecutor))
        .unwrap()
        .with_image_loader(dxe_images);
    assert_eq!(dxe.services().fvs().len(), 2);

    let report = dxe.run_to_bds().unwrap();
    assert_eq!(*trace.lock().unwrap(), vec!["a", "b", "and", "after"]);
    assert_eq!(report.dispatched.len(), 5);
    assert!(report.failed.is_empty());
    assert!(board.lock().unwrap().starts_with(b"board-rev-4"));
    assert!(dxe.services().mm().unwrap().is_locked());
    assert_eq!(dxe.services().phase(), Phase::Bds);

    dxe.exit_boot_services().unwrap();
    assert_eq!(dxe.services().phase(), Phase::Runtime);
    let again = dxe.exit_boot_services();
    assert_eq!(again, Err(PhaseError::IllegalTransition { from: Phase::Runtime, to: Phase::Runtime }));
}

#[test]
fn before_constraint_runs_ahead_of_its_target() {
    let (memory_peim, target, early) = (guid(0x41), guid(0x42), guid(0x43));
    let trace: Trace = Arc::default();
    let images = BuiltinImages::new()
        .with(memory_peim, |services: &mut PeiServices| services.install_pei_memory(MEMORY, MEMORY_SIZE))
        .with(target, traced(&trace, "target"))
        .with(early, traced(&trace, "early"));
    let files = vec![
        peim(memory_peim, None),
        peim(target, Some(&[push(&MEMORY_DISCOVERED_PPI), Opcode::End])),
        peim(early, Some(&[before(&target), Opcode::End])),
    ];

    let handoff = PeiCore::new(sec(files), config()).unwrap().with_image_loader(images).run().unwrap();
    assert_eq!(*trace.lock().unwrap(), vec!["early", "target"]);
    assert_eq!(handoff.report.dispatched, vec![memory_peim, early, target]);
}

#[test]
fn end_of_pei_is_visible_to_late_notifications() {
    let memory_peim = guid(0x51);
    let fired = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&fired);
    let images = BuiltinImages::new().with(memory_peim, move |services: &mut PeiServices| {
        let record = Arc::clone(&record);
        services.notify_ppi(
            END_OF_PEI_PPI,
            Arc::new(move |services: &mut PeiServices, _: &efi::Guid, _: &pi_boot_core::Interface| {
                record.lock().unwrap().push(services.phase());
            }),
        );
        services.install_pei_memory(MEMORY, MEMORY_SIZE)
    });

    PeiCore::new(sec(vec![peim(memory_peim, None)]), config()).unwrap().with_image_loader(images).run().unwrap();
    assert_eq!(*fired.lock().unwrap(), vec![Phase::PeiPostMemory]);
}

#[test]
fn unbacked_memory_fails_the_memory_test_and_resets() {
    let memory_peim = guid(0x61);
    let reset = Arc::new(RecordedReset::new());
    let images = BuiltinImages::new()
        .with(memory_peim, |services: &mut PeiServices| services.install_pei_memory(MEMORY, MEMORY_SIZE));

    let result = PeiCore::new(sec(vec![peim(memory_peim, None)]), config())
        .unwrap()
        .with_image_loader(images)
        .with_memory_test(PatternMemoryTest::new(MEMORY, vec![0u8; 0x1000]))
        .with_platform_reset(reset.clone())
        .run();

    assert_eq!(result.err(), Some(FatalError::MemoryTestFailed(EfiError::DeviceError)));
    assert_eq!(reset.requests(), vec![(ResetType::Cold, efi::Status::DEVICE_ERROR)]);
}

#[test]
fn failing_drivers_do_not_stop_dispatch() {
    let (memory_peim, broken, dependent, unrelated) = (guid(0x71), guid(0x72), guid(0x73), guid(0x74));
    let broken_ppi = guid(0x75);
    let images = BuiltinImages::new()
        .with(memory_peim, |services: &mut PeiServices| services.install_pei_memory(MEMORY, MEMORY_SIZE))
        .with(broken, |_: &mut PeiServices| Err(EfiError::DeviceError))
        .with(unrelated, |_: &mut PeiServices| Ok(()));
    let files = vec![
        peim(memory_peim, None),
        peim(broken, None),
        peim(dependent, Some(&[push(&broken_ppi), Opcode::End])),
        peim(unrelated, None),
    ];

    let handoff = PeiCore::new(sec(files), config()).unwrap().with_image_loader(images).run().unwrap();
    assert_eq!(handoff.report.dispatched, vec![memory_peim, unrelated]);
    assert_eq!(handoff.report.failure_of(&broken), Some(DispatchFailure::Start(EfiError::DeviceError)));
    assert_eq!(handoff.report.failure_of(&dependent), Some(DispatchFailure::Unsatisfied));
}

#[test]
fn corrupt_files_are_skipped_in_both_phases() {
    let (memory_peim, damaged_peim, late_peim) = (guid(0x81), guid(0x82), guid(0x83));
    let (damaged_driver, late_driver) = (guid(0x84), guid(0x85));
    let trace: Trace = Arc::default();
    let pei_images = BuiltinImages::new()
        .with(memory_peim, |services: &mut PeiServices| services.install_pei_memory(MEMORY, MEMORY_SIZE))
        .with(damaged_peim, traced(&trace, "damaged peim"))
        .with(late_peim, traced(&trace, "late peim"));
    let pei_fv = volume(0xFFF0_0000, vec![peim(memory_peim, None), peim(damaged_peim, None), peim(late_peim, None)]);
    let sec = SecHandoff {
        boot_mode: boot_mode::BOOT_WITH_FULL_CONFIGURATION,
        temp_ram_base: TEMP_RAM,
        temp_ram_size: TEMP_RAM_SIZE,
        boot_fvs: vec![with_damaged_file(&pei_fv, &damaged_peim)],
    };

    let mut handoff = PeiCore::new(sec, config()).unwrap().with_image_loader(pei_images).run().unwrap();
    assert_eq!(handoff.report.dispatched, vec![memory_peim, late_peim]);

    let dxe_fv = volume(DXE_FV_BASE, vec![dxe_driver(damaged_driver, None), dxe_driver(late_driver, None)]);
    let dxe_fv = with_damaged_file(&dxe_fv, &damaged_driver);
    handoff.hobs.build_fv_hob(DXE_FV_BASE, dxe_fv.len()).unwrap();
    handoff.fvs.push(dxe_fv);
    let dxe_images = BuiltinImages::new()
        .with(damaged_driver, traced(&trace, "damaged driver"))
        .with(late_driver, traced(&trace, "late driver"));
    let mut dxe = DxeCore::new(handoff, config(), Arc::new(NullReset)).unwrap().with_image_loader(dxe_images);
    let report = dxe.run_to_bds().unwrap();

    assert_eq!(report.dispatched, vec![late_driver]);
    assert_eq!(*trace.lock().unwrap(), vec!["late peim", "late driver"]);
}
