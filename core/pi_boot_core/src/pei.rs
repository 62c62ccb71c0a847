//! PEI core and PEI services.
//!
//! [`PeiCore::run`] dispatches PEIMs from the boot firmware volumes (and any volume a PEIM installs) until nothing
//! more can run, then hands off to DXE. Two transitions happen on the way:
//!
//! - **Memory discovered.** After the PEIM that called [`PeiServices::install_pei_memory`] returns, the core tests
//!   the memory, moves the HOB list into it, records the old temporary RAM as allocated, and installs the
//!   Memory-Discovered PPI. The services generation is bumped: a [`ServicesHandle`] obtained before the move is
//!   rejected by [`PeiServices::check_handle`] afterwards.
//! - **End of PEI.** The End-of-PEI PPI is installed and the HOB list, boot mode, and volumes are returned as a
//!   [`Handoff`].
//!
//! A failed memory test, exhausted HOB space, a corrupt HOB list, or PEI ending without permanent memory are fatal:
//! the platform reset capability is invoked and a [`FatalError`] is returned.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::fmt;

use pi_ffs::section::SectionExtractor;
use pi_ffs_extractors::GuidedSectionExtractorRegistry;
use pi_internal_hob::{HobError, HobList, UNNAMED_ALLOCATION};
use pi_sdk::{
    error::EfiError,
    guid_fmt,
    pi::{
        guids::{END_OF_PEI_PPI, MEMORY_DISCOVERED_PPI},
        BootMode,
    },
};
use r_efi::efi;

use crate::{
    capabilities::{
        AllowAllImages, ImageLoader, ImageOrigin, MemoryTest, NullImageLoader, NullMemoryTest, NullReset,
        PlatformReset, ResetType, SecurityPolicy,
    },
    config::CoreConfig,
    dispatcher::{DispatchFailure, DispatchReport, Dispatcher},
    error::{FatalError, PhaseError},
    fv::{discover_drivers, DriverFile, DriverFilter, FvImage},
    phase::{Phase, PhaseTracker},
    registry::{Interface, InterfaceDb, InterfaceNotify, NotifyId},
};

/// What SEC passes to the PEI core.
#[derive(Debug, Clone)]
pub struct SecHandoff {
    pub boot_mode: BootMode,
    pub temp_ram_base: u64,
    pub temp_ram_size: usize,
    pub boot_fvs: Vec<FvImage>,
}

/// A PEIM's reference to the services table, valid until the table moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicesHandle {
    generation: u32,
}

impl ServicesHandle {
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// The interface installed with the Memory-Discovered PPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermanentMemory {
    pub base: u64,
    pub length: u64,
}

/// What PEI hands to DXE.
#[derive(Debug)]
pub struct Handoff {
    pub hobs: HobList,
    pub boot_mode: BootMode,
    pub fvs: Vec<FvImage>,
    pub report: DispatchReport,
}

impl Handoff {
    /// A hand-off for a platform that enters DXE without running this PEI core.
    ///
    /// `bytes` must hold a HOB list starting with a PHIT; the boot mode is read from it.
    pub fn from_hob_bytes(base: u64, bytes: Vec<u8>, fvs: Vec<FvImage>) -> Result<Self, FatalError> {
        let hobs = HobList::from_bytes(base, bytes).map_err(FatalError::from_hob)?;
        Ok(Self { boot_mode: hobs.boot_mode(), hobs, fvs, report: DispatchReport::default() })
    }
}

pub struct PeiServices {
    generation: u32,
    ppis: InterfaceDb<PeiServices>,
    hobs: HobList,
    hob_capacity: usize,
    fvs: Vec<FvImage>,
    pending_memory: Option<PermanentMemory>,
    permanent_memory: Option<PermanentMemory>,
    hob_exhausted: Option<HobError>,
    reset: Arc<dyn PlatformReset>,
    phase: PhaseTracker,
}

impl PeiServices {
    pub fn handle(&self) -> ServicesHandle {
        ServicesHandle { generation: self.generation }
    }

    /// Reject a handle obtained before the services table last moved.
    pub fn check_handle(&self, handle: ServicesHandle) -> Result<(), PhaseError> {
        if handle.generation != self.generation {
            log::error!(
                target: "pi_phase",
                "stale PEI services handle (generation {}, current {})",
                handle.generation,
                self.generation
            );
            return Err(PhaseError::StaleHandle { handle: handle.generation, current: self.generation });
        }
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.phase.phase()
    }

    /// Install a PPI and run the notifications registered for it.
    pub fn install_ppi(&mut self, guid: efi::Guid, interface: Interface) -> Result<(), EfiError> {
        let notifies = self.ppis.install(guid, Arc::clone(&interface))?;
        self.run_notifies(&guid, &interface, notifies);
        Ok(())
    }

    pub fn reinstall_ppi(&mut self, guid: efi::Guid, interface: Interface) -> Result<(), EfiError> {
        let notifies = self.ppis.reinstall(guid, Arc::clone(&interface))?;
        self.run_notifies(&guid, &interface, notifies);
        Ok(())
    }

    pub fn locate_ppi(&self, guid: &efi::Guid) -> Result<Interface, EfiError> {
        self.ppis.locate(guid)
    }

    pub fn locate_ppi_as<T: core::any::Any + Send + Sync>(&self, guid: &efi::Guid) -> Result<Arc<T>, EfiError> {
        self.ppis.locate_as(guid)
    }

    /// Register `notify` for `guid`. If the PPI is already installed the notification runs now.
    pub fn notify_ppi(&mut self, guid: efi::Guid, notify: InterfaceNotify<PeiServices>) -> NotifyId {
        let id = self.ppis.register_notify(guid, Arc::clone(&notify));
        if let Ok(interface) = self.ppis.locate(&guid) {
            notify(self, &guid, &interface);
        }
        id
    }

    pub fn ppis(&self) -> &InterfaceDb<PeiServices> {
        &self.ppis
    }

    fn run_notifies(
        &mut self,
        guid: &efi::Guid,
        interface: &Interface,
        notifies: Vec<InterfaceNotify<PeiServices>>,
    ) {
        for notify in notifies {
            notify(self, guid, interface);
        }
    }

    pub fn boot_mode(&self) -> BootMode {
        self.hobs.boot_mode()
    }

    pub fn set_boot_mode(&mut self, boot_mode: BootMode) {
        log::info!(target: "pi_phase", "boot mode set to {boot_mode:#x}");
        self.hobs.set_boot_mode(boot_mode);
    }

    pub fn hobs(&self) -> &HobList {
        &self.hobs
    }

    fn track_hob(&mut self, result: pi_internal_hob::Result<usize>) -> Result<usize, EfiError> {
        if let Err(err @ HobError::OutOfResources { .. }) = result {
            self.hob_exhausted.get_or_insert(err);
        }
        result.map_err(EfiError::from)
    }

    /// Append a zeroed HOB. Running out of HOB space is fatal once the calling PEIM returns.
    pub fn create_hob(&mut self, r#type: u16, payload_size: usize) -> Result<usize, EfiError> {
        let result = self.hobs.create_hob(r#type, payload_size);
        self.track_hob(result)
    }

    pub fn build_guid_hob(&mut self, guid: &efi::Guid, data: &[u8]) -> Result<usize, EfiError> {
        let result = self.hobs.build_guid_hob(guid, data);
        self.track_hob(result)
    }

    pub fn hob_payload_mut(&mut self, offset: usize) -> Result<&mut [u8], EfiError> {
        self.hobs.payload_mut(offset).map_err(EfiError::from)
    }

    /// Report permanent memory. The core switches to it when the calling PEIM returns.
    pub fn install_pei_memory(&mut self, base: u64, length: u64) -> Result<(), EfiError> {
        if self.pending_memory.is_some() || self.permanent_memory.is_some() {
            log::warn!(target: "pi_phase", "permanent memory already installed");
            return Err(EfiError::AlreadyStarted);
        }
        if length < self.hob_capacity as u64 || base.checked_add(length).is_none() {
            log::error!(target: "pi_phase", "permanent memory [{base:#x}, +{length:#x}) cannot hold the HOB list");
            return Err(EfiError::InvalidParameter);
        }
        log::info!(target: "pi_phase", "permanent memory installed at [{base:#x}, +{length:#x})");
        self.pending_memory = Some(PermanentMemory { base, length });
        Ok(())
    }

    pub fn permanent_memory(&self) -> Option<PermanentMemory> {
        self.permanent_memory
    }

    /// Make a firmware volume available for dispatch and record it in an FV HOB. A volume already known is ignored.
    pub fn install_fv(&mut self, fv: FvImage) -> Result<(), EfiError> {
        if self.fvs.iter().any(|known| known.base() == fv.base() && known.bytes() == fv.bytes()) {
            return Ok(());
        }
        fv.volume().map_err(|err| {
            log::error!(target: "pi_dispatcher", "refusing {fv:?}: {err}");
            EfiError::from(err)
        })?;
        let result = self.hobs.build_fv_hob(fv.base(), fv.len());
        self.track_hob(result)?;
        log::info!(target: "pi_dispatcher", "installed {fv:?}");
        self.fvs.push(fv);
        Ok(())
    }

    pub fn fvs(&self) -> &[FvImage] {
        &self.fvs
    }

    pub fn reset_system(&self, reset_type: ResetType, status: efi::Status) {
        self.reset.reset_system(reset_type, status);
    }
}

impl fmt::Debug for PeiServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeiServices")
            .field("generation", &self.generation)
            .field("phase", &self.phase)
            .field("ppis", &self.ppis)
            .field("hobs", &self.hobs)
            .field("fvs", &self.fvs)
            .finish_non_exhaustive()
    }
}

pub struct PeiCore {
    config: CoreConfig,
    services: PeiServices,
    dispatcher: Dispatcher,
    scanned_fvs: usize,
    temp_ram: PermanentMemory,
    image_loader: Box<dyn ImageLoader<PeiServices>>,
    security: Box<dyn SecurityPolicy>,
    memory_test: Box<dyn MemoryTest>,
    extractor: Box<dyn SectionExtractor>,
}

impl PeiCore {
    /// Build the HOB list in temporary RAM and take over the boot volumes.
    pub fn new(sec: SecHandoff, config: CoreConfig) -> Result<Self, FatalError> {
        config.validate().map_err(FatalError::InvalidConfig)?;
        let hobs = HobList::new(sec.temp_ram_base, config.hob_capacity.min(sec.temp_ram_size), sec.boot_mode)
            .map_err(FatalError::from_hob)?;
        let mut phase = PhaseTracker::new();
        phase.advance(Phase::PeiPreMemory).map_err(FatalError::Phase)?;

        let mut services = PeiServices {
            generation: 0,
            ppis: InterfaceDb::new("PPI"),
            hobs,
            hob_capacity: config.hob_capacity,
            fvs: Vec::new(),
            pending_memory: None,
            permanent_memory: None,
            hob_exhausted: None,
            reset: Arc::new(NullReset),
            phase,
        };
        for fv in sec.boot_fvs {
            if let Err(err) = services.install_fv(fv) {
                log::error!(target: "pi_dispatcher", "boot firmware volume skipped: {err:?}");
            }
        }

        Ok(Self {
            config,
            services,
            dispatcher: Dispatcher::new(),
            scanned_fvs: 0,
            temp_ram: PermanentMemory { base: sec.temp_ram_base, length: sec.temp_ram_size as u64 },
            image_loader: Box::new(NullImageLoader),
            security: Box::new(AllowAllImages),
            memory_test: Box::new(NullMemoryTest),
            extractor: Box::new(GuidedSectionExtractorRegistry::with_default_codecs()),
        })
    }

    pub fn with_image_loader(mut self, loader: impl ImageLoader<PeiServices> + 'static) -> Self {
        self.image_loader = Box::new(loader);
        self
    }

    pub fn with_security_policy(mut self, policy: impl SecurityPolicy + 'static) -> Self {
        self.security = Box::new(policy);
        self
    }

    pub fn with_memory_test(mut self, memory_test: impl MemoryTest + 'static) -> Self {
        self.memory_test = Box::new(memory_test);
        self
    }

    pub fn with_platform_reset(mut self, reset: Arc<dyn PlatformReset>) -> Self {
        self.services.reset = reset;
        self
    }

    pub fn with_section_extractor(mut self, extractor: impl SectionExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn services(&self) -> &PeiServices {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut PeiServices {
        &mut self.services
    }

    fn fatal(&self, err: FatalError) -> FatalError {
        log::error!(target: "pi_phase", "fatal error in {}: {err}", self.services.phase());
        self.services.reset.reset_system(ResetType::Cold, EfiError::from(err).into());
        err
    }

    fn scan_new_fvs(&mut self) {
        while self.scanned_fvs < self.services.fvs.len() {
            let fv = self.services.fvs[self.scanned_fvs].clone();
            self.scanned_fvs += 1;
            let added = self.dispatcher.extend(discover_drivers(&fv, self.extractor.as_ref(), &DriverFilter::PEI));
            log::debug!(target: "pi_dispatcher", "{added} PEIMs found in {fv:?}");
        }
    }

    fn start(&mut self, driver: &DriverFile) -> Result<(), DispatchFailure> {
        self.security
            .authenticate(&driver.name, &driver.image, ImageOrigin::FirmwareVolume)
            .map_err(DispatchFailure::Security)?;
        let entry = self.image_loader.load(&driver.name, &driver.image).map_err(DispatchFailure::Load)?;
        log::info!(target: "pi_dispatcher", "starting PEIM {}", guid_fmt!(driver.name));
        entry(&mut self.services).map_err(DispatchFailure::Start)
    }

    fn check_hob_space(&self) -> Result<(), FatalError> {
        match self.services.hob_exhausted {
            Some(err) => Err(self.fatal(FatalError::HobSpaceExhausted(err))),
            None => Ok(()),
        }
    }

    /// Move to permanent memory after the PEIM that installed it has returned.
    fn memory_discovered(&mut self, memory: PermanentMemory) -> Result<(), FatalError> {
        if let Err(err) = self.memory_test.test_memory(memory.base, memory.length) {
            return Err(self.fatal(FatalError::MemoryTestFailed(err)));
        }

        let hobs = &self.services.hobs;
        let relocated = HobList::from_bytes(hobs.base(), hobs.as_bytes().to_vec())
            .and_then(|copy| copy.relocate(memory.base, self.config.hob_capacity));
        self.services.hobs = match relocated {
            Ok(hobs) => hobs,
            Err(err) => return Err(self.fatal(FatalError::from_hob(err))),
        };

        let allocation = self.services.hobs.build_memory_allocation_hob(
            &UNNAMED_ALLOCATION,
            self.temp_ram.base,
            self.temp_ram.length,
            efi::BOOT_SERVICES_DATA,
        );
        if let Err(err) = allocation {
            return Err(self.fatal(FatalError::from_hob(err)));
        }

        self.services.generation += 1;
        if let Err(err) = self.services.phase.advance(Phase::PeiPostMemory) {
            return Err(self.fatal(FatalError::Phase(err)));
        }
        self.services.permanent_memory = Some(memory);
        if let Err(err) = self.services.install_ppi(MEMORY_DISCOVERED_PPI, Arc::new(memory)) {
            log::warn!(target: "pi_phase", "Memory-Discovered PPI already installed: {err:?}");
        }
        self.check_hob_space()
    }

    fn after_peim(&mut self) -> Result<(), FatalError> {
        self.check_hob_space()?;
        match self.services.pending_memory.take() {
            Some(memory) => self.memory_discovered(memory),
            None => Ok(()),
        }
    }

    /// Dispatch every PEIM that can run, then end PEI.
    pub fn run(mut self) -> Result<Handoff, FatalError> {
        let mut passes = 0;
        loop {
            self.scan_new_fvs();
            if passes == self.config.max_dispatch_passes {
                log::warn!(target: "pi_dispatcher", "PEI dispatch stopped after {passes} passes");
                break;
            }
            let batch = self.dispatcher.next_batch(&self.services.ppis);
            if batch.is_empty() {
                break;
            }
            passes += 1;
            for driver in batch {
                let outcome = self.start(&driver);
                self.dispatcher.complete(driver.name, outcome);
                self.after_peim()?;
            }
        }
        self.dispatcher.log_undispatched(&self.services.ppis);

        if self.services.permanent_memory.is_none() {
            return Err(self.fatal(FatalError::NoPermanentMemory));
        }
        if let Err(err) = self.services.install_ppi(END_OF_PEI_PPI, Arc::new(())) {
            log::warn!(target: "pi_phase", "End-of-PEI PPI already installed: {err:?}");
        }
        self.check_hob_space()?;

        let report = self.dispatcher.report();
        log::info!(
            target: "pi_phase",
            "end of PEI: {} PEIMs dispatched, {} not",
            report.dispatched.len(),
            report.failed.len()
        );
        let services = self.services;
        Ok(Handoff { boot_mode: services.hobs.boot_mode(), hobs: services.hobs, fvs: services.fvs, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capabilities::{BuiltinImages, MockMemoryTest, RecordedReset},
        test_support::{driver, fv_image},
    };
    use pi_internal_depex::{push, Opcode};
    use pi_internal_hob::Hob;
    use pi_sdk::pi::{boot_mode, fw_fs::file::r#type::PEIM, fw_fs::section::r#type::PEI_DEPEX};
    use std::{sync::Mutex, vec};

    const TEMP_RAM: u64 = 0xFEF0_0000;
    const MEMORY: u64 = 0x8000_0000;
    const MEMORY_PEIM: efi::Guid = efi::Guid::from_bytes(&[0x01; 16]);
    const LATE_PEIM: efi::Guid = efi::Guid::from_bytes(&[0x02; 16]);
    const PLATFORM_PPI: efi::Guid = efi::Guid::from_bytes(&[0xA1; 16]);

    fn sec(files: Vec<pi_ffs::file::File>) -> SecHandoff {
        SecHandoff {
            boot_mode: boot_mode::BOOT_WITH_FULL_CONFIGURATION,
            temp_ram_base: TEMP_RAM,
            temp_ram_size: 0x8000,
            boot_fvs: vec![fv_image(0xFFF0_0000, files)],
        }
    }

    fn config() -> CoreConfig {
        CoreConfig::default().with_hob_capacity(0x4000)
    }

    fn two_peims() -> Vec<pi_ffs::file::File> {
        vec![
            driver(LATE_PEIM, PEIM, PEI_DEPEX, Some(&[push(&MEMORY_DISCOVERED_PPI), Opcode::End])),
            driver(MEMORY_PEIM, PEIM, PEI_DEPEX, None),
        ]
    }

    fn install_memory(services: &mut PeiServices) -> Result<(), EfiError> {
        services.install_pei_memory(MEMORY, 0x100_0000)
    }

    #[test]
    fn memory_discovery_moves_the_hob_list() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let late_seen = Arc::clone(&seen);
        let images = BuiltinImages::new().with(MEMORY_PEIM, install_memory).with(
            LATE_PEIM,
            move |services: &mut PeiServices| {
                let memory = services.locate_ppi_as::<PermanentMemory>(&MEMORY_DISCOVERED_PPI)?;
                late_seen.lock().unwrap().push((services.phase(), memory.base, services.hobs().base()));
                Ok(())
            },
        );

        let handoff = PeiCore::new(sec(two_peims()), config()).unwrap().with_image_loader(images).run().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(Phase::PeiPostMemory, MEMORY, MEMORY)]);
        assert_eq!(handoff.report.dispatched, vec![MEMORY_PEIM, LATE_PEIM]);
        assert_eq!(handoff.hobs.base(), MEMORY);
        assert_eq!(handoff.hobs.capacity(), 0x4000);
        let temp_ram_recorded = handoff.hobs.iter().any(|hob| {
            matches!(hob.decode(), Hob::MemoryAllocation(alloc)
                if alloc.memory_base_address == TEMP_RAM && alloc.memory_length == 0x8000)
        });
        assert!(temp_ram_recorded);
        assert_eq!(handoff.hobs.iter().filter(|hob| matches!(hob.decode(), Hob::FirmwareVolume(_))).count(), 1);
    }

    #[test]
    fn handles_from_before_the_move_are_stale() {
        let handle = Arc::new(Mutex::new(None));
        let stash = Arc::clone(&handle);
        let check = Arc::clone(&handle);
        let results = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&results);
        let images = BuiltinImages::new()
            .with(MEMORY_PEIM, move |services: &mut PeiServices| {
                *stash.lock().unwrap() = Some(services.handle());
                install_memory(services)
            })
            .with(LATE_PEIM, move |services: &mut PeiServices| {
                let old = check.lock().unwrap().unwrap();
                record.lock().unwrap().push(services.check_handle(old));
                record.lock().unwrap().push(services.check_handle(services.handle()));
                Ok(())
            });

        PeiCore::new(sec(two_peims()), config()).unwrap().with_image_loader(images).run().unwrap();
        assert_eq!(*results.lock().unwrap(), vec![Err(PhaseError::StaleHandle { handle: 0, current: 1 }), Ok(())]);
    }

    #[test]
    fn end_of_pei_notifications_run_before_handoff() {
        let fired = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&fired);
        let images = BuiltinImages::new().with(MEMORY_PEIM, move |services: &mut PeiServices| {
            let counter = Arc::clone(&counter);
            services.notify_ppi(END_OF_PEI_PPI, Arc::new(move |_: &mut PeiServices, _: &efi::Guid, _: &Interface| {
                *counter.lock().unwrap() += 1;
            }));
            install_memory(services)
        });

        let files = vec![driver(MEMORY_PEIM, PEIM, PEI_DEPEX, None)];
        PeiCore::new(sec(files), config()).unwrap().with_image_loader(images).run().unwrap();
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[test]
    fn missing_memory_is_fatal_and_resets() {
        let reset = Arc::new(RecordedReset::new());
        let images = BuiltinImages::new().with(MEMORY_PEIM, |_: &mut PeiServices| Ok(()));
        let files = vec![driver(MEMORY_PEIM, PEIM, PEI_DEPEX, None)];
        let result = PeiCore::new(sec(files), config())
            .unwrap()
            .with_image_loader(images)
            .with_platform_reset(reset.clone())
            .run();

        assert_eq!(result.err(), Some(FatalError::NoPermanentMemory));
        assert_eq!(reset.requests(), vec![(ResetType::Cold, efi::Status::NOT_FOUND)]);
    }

    #[test]
    fn failed_memory_test_is_fatal() {
        let mut memory_test = MockMemoryTest::new();
        memory_test.expect_test_memory().times(1).returning(|_, _| Err(EfiError::DeviceError));
        let reset = Arc::new(RecordedReset::new());
        let images = BuiltinImages::new().with(MEMORY_PEIM, install_memory);
        let result = PeiCore::new(sec(two_peims()), config())
            .unwrap()
            .with_image_loader(images)
            .with_memory_test(memory_test)
            .with_platform_reset(reset.clone())
            .run();

        assert_eq!(result.err(), Some(FatalError::MemoryTestFailed(EfiError::DeviceError)));
        assert_eq!(reset.requests(), vec![(ResetType::Cold, efi::Status::DEVICE_ERROR)]);
    }

    #[test]
    fn exhausted_hob_space_is_fatal() {
        let reset = Arc::new(RecordedReset::new());
        let images = BuiltinImages::new().with(MEMORY_PEIM, |services: &mut PeiServices| {
            let filler = vec![0u8; 0x1000];
            while services.build_guid_hob(&PLATFORM_PPI, &filler).is_ok() {}
            Ok(())
        });
        let files = vec![driver(MEMORY_PEIM, PEIM, PEI_DEPEX, None)];
        let result = PeiCore::new(sec(files), config())
            .unwrap()
            .with_image_loader(images)
            .with_platform_reset(reset.clone())
            .run();

        assert!(matches!(result, Err(FatalError::HobSpaceExhausted(HobError::OutOfResources { .. }))));
        assert_eq!(reset.requests().len(), 1);
    }

    #[test]
    fn services_report_misuse_locally() {
        let mut core = PeiCore::new(sec(Vec::new()), config()).unwrap();
        let services = core.services_mut();
        assert_eq!(services.locate_ppi(&PLATFORM_PPI).err(), Some(EfiError::NotFound));
        assert_eq!(services.install_pei_memory(MEMORY, 0x100), Err(EfiError::InvalidParameter));
        install_memory(services).unwrap();
        assert_eq!(install_memory(services), Err(EfiError::AlreadyStarted));
        assert_eq!(services.install_fv(FvImage::new(0x1000, vec![0u8; 64])), Err(EfiError::VolumeCorrupted));

        services.set_boot_mode(boot_mode::BOOT_ON_S3_RESUME);
        assert_eq!(services.boot_mode(), boot_mode::BOOT_ON_S3_RESUME);

        services.install_ppi(PLATFORM_PPI, Arc::new(7u32)).unwrap();
        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);
        services.notify_ppi(PLATFORM_PPI, Arc::new(move |_: &mut PeiServices, _: &efi::Guid, _: &Interface| {
            *flag.lock().unwrap() = true;
        }));
        assert!(*fired.lock().unwrap());
    }

    #[test]
    fn refused_peims_are_reported() {
        let images = BuiltinImages::new().with(MEMORY_PEIM, install_memory);
        let policy = crate::capabilities::DenyListPolicy::new(vec![LATE_PEIM]);
        let handoff = PeiCore::new(sec(two_peims()), config())
            .unwrap()
            .with_image_loader(images)
            .with_security_policy(policy)
            .run()
            .unwrap();
        assert_eq!(handoff.report.failure_of(&LATE_PEIM), Some(DispatchFailure::Security(EfiError::SecurityViolation)));
    }
}
