//! DXE core and boot services.
//!
//! [`DxeCore::new`] takes the PEI [`Handoff`] and resolves the firmware volumes named by FV HOBs.
//! [`DxeCore::from_hob_bytes`] does the same for a raw HOB list, which is checked first. From there the platform
//! drives the remaining transitions:
//!
//! ```text
//! dispatch() -> signal_end_of_dxe() -> [SMM ready-to-lock installed] -> enter_bds() -> exit_boot_services()
//! ```
//!
//! Between End-of-DXE and SMM ready-to-lock, third-party images are refused by [`DxeCore::load_image`].
//! Installing the SMM ready-to-lock protocol locks the MM handler registry.
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
use pi_internal_depex::Depex;
use pi_internal_hob::{Hob, HobList};
use pi_sdk::{
    error::EfiError,
    guid_fmt,
    pi::{
        guids::{END_OF_DXE_EVENT_GROUP, READY_TO_BOOT_EVENT_GROUP, SMM_READY_TO_LOCK_PROTOCOL},
        BootMode,
    },
    policy,
    runtime::{NullVariableStorage, VariableStorage},
};
use r_efi::efi;

use crate::{
    capabilities::{
        AllowAllImages, ImageLoader, ImageOrigin, MmExecutor, NullImageLoader, PlatformReset, ResetType,
        SecurityPolicy,
    },
    config::CoreConfig,
    dispatcher::{DispatchFailure, DispatchReport, Dispatcher},
    error::{FatalError, PhaseError},
    events::{EventGroups, EventId, EventNotify},
    fv::{discover_drivers, DriverFile, DriverFilter, FvImage},
    mm::{MmHandler, MmServices},
    pei::Handoff,
    phase::{Phase, PhaseTracker},
    registry::{Interface, InterfaceDb, InterfaceNotify, NotifyId},
    runtime::RuntimeServices,
};

pub struct BootServices {
    protocols: InterfaceDb<BootServices>,
    events: EventGroups<BootServices>,
    hobs: HobList,
    boot_mode: BootMode,
    fvs: Vec<FvImage>,
    phase: PhaseTracker,
    runtime: RuntimeServices,
    mm: Option<MmServices>,
    ready_to_lock: bool,
}

impl BootServices {
    pub fn phase(&self) -> Phase {
        self.phase.phase()
    }

    pub fn boot_mode(&self) -> BootMode {
        self.boot_mode
    }

    /// Install a protocol and run the notifications registered for it.
    pub fn install_protocol(&mut self, guid: efi::Guid, interface: Interface) -> Result<(), EfiError> {
        let notifies = self.protocols.install(guid, Arc::clone(&interface))?;
        for notify in notifies {
            notify(self, &guid, &interface);
        }
        Ok(())
    }

    pub fn reinstall_protocol(&mut self, guid: efi::Guid, interface: Interface) -> Result<(), EfiError> {
        let notifies = self.protocols.reinstall(guid, Arc::clone(&interface))?;
        for notify in notifies {
            notify(self, &guid, &interface);
        }
        Ok(())
    }

    pub fn uninstall_protocol(&mut self, guid: &efi::Guid) -> Result<Interface, EfiError> {
        self.protocols.uninstall(guid)
    }

    pub fn locate_protocol(&self, guid: &efi::Guid) -> Result<Interface, EfiError> {
        self.protocols.locate(guid)
    }

    pub fn locate_protocol_as<T: core::any::Any + Send + Sync>(&self, guid: &efi::Guid) -> Result<Arc<T>, EfiError> {
        self.protocols.locate_as(guid)
    }

    /// Register `notify` for future installs of `guid`.
    pub fn notify_protocol(&mut self, guid: efi::Guid, notify: InterfaceNotify<BootServices>) -> NotifyId {
        self.protocols.register_notify(guid, notify)
    }

    pub fn protocols(&self) -> &InterfaceDb<BootServices> {
        &self.protocols
    }

    pub fn create_event_ex(&mut self, group: efi::Guid, notify: EventNotify<BootServices>) -> EventId {
        self.events.create_event_ex(group, notify)
    }

    pub fn close_event(&mut self, id: EventId) -> Result<(), EfiError> {
        self.events.close_event(id)
    }

    /// Run every notification in `group`, in the order the events were created.
    pub fn signal_event_group(&mut self, group: &efi::Guid) {
        let notifies = self.events.signal(group);
        log::debug!(target: "pi_phase", "signalling {} ({} events)", guid_fmt!(group), notifies.len());
        for notify in notifies {
            notify(self, group);
        }
    }

    pub fn hobs(&self) -> &HobList {
        &self.hobs
    }

    pub fn build_guid_hob(&mut self, guid: &efi::Guid, data: &[u8]) -> Result<usize, EfiError> {
        self.hobs.build_guid_hob(guid, data).map_err(EfiError::from)
    }

    pub fn fvs(&self) -> &[FvImage] {
        &self.fvs
    }

    /// Make a firmware volume available for dispatch. A volume already known is ignored.
    pub fn install_fv(&mut self, fv: FvImage) -> Result<(), EfiError> {
        if self.fvs.contains(&fv) {
            return Ok(());
        }
        fv.volume().map_err(|err| {
            log::error!(target: "pi_dispatcher", "refusing {fv:?}: {err}");
            EfiError::from(err)
        })?;
        self.hobs.build_fv_hob(fv.base(), fv.len()).map_err(EfiError::from)?;
        log::info!(target: "pi_dispatcher", "installed {fv:?}");
        self.fvs.push(fv);
        Ok(())
    }

    pub fn runtime(&self) -> &RuntimeServices {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut RuntimeServices {
        &mut self.runtime
    }

    pub fn is_ready_to_lock(&self) -> bool {
        self.ready_to_lock
    }

    pub fn mm(&self) -> Option<&MmServices> {
        self.mm.as_ref()
    }

    pub fn register_mm_handler(&mut self, guid: efi::Guid, handler: Arc<dyn MmHandler>) -> Result<(), EfiError> {
        self.mm.as_mut().ok_or(EfiError::Unsupported)?.register_handler(guid, handler)
    }

    /// Send `buffer` to its MM handler and return once the response is in place.
    pub fn mm_communicate(&mut self, buffer: &mut [u8]) -> Result<(), EfiError> {
        let Some(mm) = self.mm.as_ref() else {
            return Err(EfiError::Unsupported);
        };
        self.phase.enter_mm()?;
        let result = mm.communicate(buffer);
        self.phase.exit_mm()?;
        result
    }

    fn lock_mm(&mut self) {
        self.ready_to_lock = true;
        if let Some(mm) = self.mm.as_mut() {
            mm.lock();
        }
        log::info!(target: "pi_phase", "SMM ready-to-lock");
    }
}

impl fmt::Debug for BootServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootServices")
            .field("phase", &self.phase)
            .field("protocols", &self.protocols)
            .field("events", &self.events)
            .field("fvs", &self.fvs)
            .field("mm", &self.mm)
            .field("ready_to_lock", &self.ready_to_lock)
            .finish_non_exhaustive()
    }
}

pub struct DxeCore {
    config: CoreConfig,
    services: BootServices,
    dispatcher: Dispatcher,
    scanned_fvs: usize,
    pei_report: DispatchReport,
    reset: Arc<dyn PlatformReset>,
    image_loader: Box<dyn ImageLoader<BootServices>>,
    security: Box<dyn SecurityPolicy>,
    extractor: Box<dyn SectionExtractor>,
}

impl DxeCore {
    /// Take over from PEI.
    pub fn new(handoff: Handoff, config: CoreConfig, reset: Arc<dyn PlatformReset>) -> Result<Self, FatalError> {
        if let Err(err) = config.validate() {
            return Err(fatal_reset(reset.as_ref(), FatalError::InvalidConfig(err)));
        }
        let mut phase = PhaseTracker::starting_at(Phase::PeiPostMemory);
        if let Err(err) = phase.advance(Phase::DxePreEndOfDxe) {
            return Err(fatal_reset(reset.as_ref(), FatalError::Phase(err)));
        }

        let fvs = volumes_from_hobs(&handoff.hobs, &handoff.fvs);
        let mut protocols = InterfaceDb::new("protocol");
        protocols.register_notify(
            SMM_READY_TO_LOCK_PROTOCOL,
            Arc::new(|services: &mut BootServices, _: &efi::Guid, _: &Interface| services.lock_mm()),
        );

        let services = BootServices {
            protocols,
            events: EventGroups::new(),
            hobs: handoff.hobs,
            boot_mode: handoff.boot_mode,
            fvs,
            phase,
            runtime: RuntimeServices::new(Box::new(NullVariableStorage), Arc::clone(&reset)),
            mm: None,
            ready_to_lock: false,
        };
        log::info!(target: "pi_phase", "DXE core started with {} firmware volumes", services.fvs.len());

        Ok(Self {
            config,
            services,
            dispatcher: Dispatcher::new(),
            scanned_fvs: 0,
            pei_report: handoff.report,
            reset,
            image_loader: Box::new(NullImageLoader),
            security: Box::new(AllowAllImages),
            extractor: Box::new(GuidedSectionExtractorRegistry::with_default_codecs()),
        })
    }

    /// Take over from a PEI implementation that left a raw HOB list at `base`. A corrupt list resets the platform.
    pub fn from_hob_bytes(
        base: u64,
        bytes: Vec<u8>,
        fvs: Vec<FvImage>,
        config: CoreConfig,
        reset: Arc<dyn PlatformReset>,
    ) -> Result<Self, FatalError> {
        let handoff = Handoff::from_hob_bytes(base, bytes, fvs).map_err(|err| fatal_reset(reset.as_ref(), err))?;
        Self::new(handoff, config, reset)
    }

    /// Provide MM, entered through `executor`, with `config.cpu_count` processors in the rendezvous.
    pub fn with_mm(mut self, executor: Arc<dyn MmExecutor>) -> Result<Self, EfiError> {
        self.services.mm = Some(MmServices::new(&self.config, executor)?);
        Ok(self)
    }

    pub fn with_variable_storage(mut self, variables: Box<dyn VariableStorage>) -> Self {
        self.services.runtime.set_variable_storage(variables);
        self
    }

    pub fn with_image_loader(mut self, loader: impl ImageLoader<BootServices> + 'static) -> Self {
        self.image_loader = Box::new(loader);
        self
    }

    pub fn with_security_policy(mut self, policy: impl SecurityPolicy + 'static) -> Self {
        self.security = Box::new(policy);
        self
    }

    pub fn with_section_extractor(mut self, extractor: impl SectionExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    /// Require `depex` of every driver in addition to its own expression.
    pub fn with_implicit_dependency(mut self, depex: Depex) -> Self {
        self.dispatcher = core::mem::take(&mut self.dispatcher).with_implicit_dependency(depex);
        self
    }

    pub fn with_platform_reset(mut self, reset: Arc<dyn PlatformReset>) -> Self {
        self.services.runtime.set_platform_reset(Arc::clone(&reset));
        self.reset = reset;
        self
    }

    pub fn services(&self) -> &BootServices {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut BootServices {
        &mut self.services
    }

    /// What the PEI core dispatched.
    pub fn pei_report(&self) -> &DispatchReport {
        &self.pei_report
    }

    pub fn report(&self) -> DispatchReport {
        self.dispatcher.report()
    }

    fn scan_new_fvs(&mut self) {
        while self.scanned_fvs < self.services.fvs.len() {
            let fv = self.services.fvs[self.scanned_fvs].clone();
            self.scanned_fvs += 1;
            let added = self.dispatcher.extend(discover_drivers(&fv, self.extractor.as_ref(), &DriverFilter::DXE));
            log::debug!(target: "pi_dispatcher", "{added} DXE drivers found in {fv:?}");
        }
    }

    fn start(&mut self, driver: &DriverFile) -> Result<(), DispatchFailure> {
        self.security
            .authenticate(&driver.name, &driver.image, ImageOrigin::FirmwareVolume)
            .map_err(DispatchFailure::Security)?;
        let entry = self.image_loader.load(&driver.name, &driver.image).map_err(DispatchFailure::Load)?;
        log::info!(target: "pi_dispatcher", "starting DXE driver {}", guid_fmt!(driver.name));
        entry(&mut self.services).map_err(DispatchFailure::Start)
    }

    /// Dispatch until no driver can run. Returns the number of drivers started by this call.
    pub fn dispatch(&mut self) -> usize {
        let mut started = 0;
        let mut passes = 0;
        loop {
            self.scan_new_fvs();
            if passes == self.config.max_dispatch_passes {
                log::warn!(target: "pi_dispatcher", "DXE dispatch stopped after {passes} passes");
                break;
            }
            let batch = self.dispatcher.next_batch(&self.services.protocols);
            if batch.is_empty() {
                break;
            }
            passes += 1;
            for driver in batch {
                let outcome = self.start(&driver);
                if outcome.is_ok() {
                    started += 1;
                }
                self.dispatcher.complete(driver.name, outcome);
            }
        }
        self.dispatcher.log_undispatched(&self.services.protocols);
        started
    }

    /// Schedule a driver held back by `SOR` and dispatch again.
    pub fn schedule(&mut self, name: &efi::Guid) -> Result<usize, EfiError> {
        self.dispatcher.schedule(name)?;
        Ok(self.dispatch())
    }

    pub fn signal_end_of_dxe(&mut self) -> Result<(), PhaseError> {
        self.services.signal_event_group(&END_OF_DXE_EVENT_GROUP);
        self.services.phase.advance(Phase::DxePostEndOfDxe)
    }

    /// Authenticate and start an image that did not come from a dispatched firmware volume.
    pub fn load_image(&mut self, name: &efi::Guid, image: &[u8], origin: ImageOrigin) -> Result<(), EfiError> {
        let locked_out = self.services.phase() >= Phase::DxePostEndOfDxe && !self.services.ready_to_lock;
        if origin == ImageOrigin::ThirdParty && locked_out {
            log::warn!(target: "pi_dispatcher", "third-party image {} refused before ready-to-lock", guid_fmt!(name));
            return Err(PhaseError::ImageRefused.into());
        }
        self.security.authenticate(name, image, origin)?;
        let entry = self.image_loader.load(name, image)?;
        log::info!(target: "pi_dispatcher", "starting {origin:?} image {}", guid_fmt!(name));
        entry(&mut self.services)
    }

    /// Leave DXE. Ready-to-boot is signalled once in BDS.
    pub fn enter_bds(&mut self) -> Result<(), PhaseError> {
        self.services.phase.advance(Phase::Bds)?;
        policy::check(
            self.config.assert_policy,
            self.services.ready_to_lock,
            "BDS entered before SMM ready-to-lock",
        );
        self.services.signal_event_group(&READY_TO_BOOT_EVENT_GROUP);
        Ok(())
    }

    /// End boot services. Afterwards only runtime-accessible variables are visible.
    pub fn exit_boot_services(&mut self) -> Result<(), PhaseError> {
        self.services.phase.advance(Phase::Runtime)?;
        self.services.runtime.enter_runtime();
        log::info!(target: "pi_phase", "boot services exited");
        Ok(())
    }

    /// Dispatch, signal End-of-DXE, and enter BDS. A phase ordering failure resets the platform.
    pub fn run_to_bds(&mut self) -> Result<DispatchReport, FatalError> {
        self.dispatch();
        let transition = self.signal_end_of_dxe().and_then(|_| self.enter_bds());
        if let Err(err) = transition {
            let err = FatalError::Phase(err);
            log::error!(target: "pi_phase", "fatal error in {}: {err}", self.services.phase());
            self.reset.reset_system(ResetType::Cold, EfiError::from(err).into());
            return Err(err);
        }
        Ok(self.report())
    }
}

fn fatal_reset(reset: &dyn PlatformReset, err: FatalError) -> FatalError {
    log::error!(target: "pi_phase", "DXE cannot start: {err}");
    reset.reset_system(ResetType::Cold, EfiError::from(err).into());
    err
}

/// The images behind FV and FV2 HOBs, in HOB order.
fn volumes_from_hobs(hobs: &HobList, images: &[FvImage]) -> Vec<FvImage> {
    let mut fvs: Vec<FvImage> = Vec::new();
    for hob in hobs.iter() {
        let (base, length) = match hob.decode() {
            Hob::FirmwareVolume(fv) => (fv.base_address, fv.length),
            Hob::FirmwareVolume2(fv) => (fv.base_address, fv.length),
            _ => continue,
        };
        match images.iter().find(|image| image.covers(base, length)) {
            Some(image) if !fvs.contains(image) => fvs.push(image.clone()),
            Some(_) => {}
            None => log::warn!(target: "pi_dispatcher", "no image for FV HOB [{base:#x}, +{length:#x})"),
        }
    }
    fvs
}
