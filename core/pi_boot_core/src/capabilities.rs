//! Platform capabilities consumed by the cores.
//!
//! Each capability is a trait with a null variant (does nothing, or refuses), at least one real variant, and a
//! `mockall` mock under `cfg(test)` or the `mockall` feature. A platform picks the variants when it builds a core.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{boxed::Box, collections::BTreeMap, sync::Arc, vec::Vec};

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use pi_sdk::{error::EfiError, guid_fmt, OrdGuid};
use r_efi::efi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetType {
    Cold,
    Warm,
    Shutdown,
    PlatformSpecific,
}

/// Resets the system. On hardware the call does not return.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait PlatformReset {
    fn reset_system(&self, reset_type: ResetType, status: efi::Status);
}

/// Logs the request and returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReset;

impl PlatformReset for NullReset {
    fn reset_system(&self, reset_type: ResetType, status: efi::Status) {
        log::error!(target: "pi_phase", "reset requested ({reset_type:?}, {status:?}) with no reset capability");
    }
}

/// Records every reset request, for hosted platforms that cannot reset.
#[derive(Debug, Default)]
pub struct RecordedReset {
    requests: spin::Mutex<Vec<(ResetType, efi::Status)>>,
}

impl RecordedReset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<(ResetType, efi::Status)> {
        self.requests.lock().clone()
    }
}

impl PlatformReset for RecordedReset {
    fn reset_system(&self, reset_type: ResetType, status: efi::Status) {
        log::warn!(target: "pi_phase", "system reset ({reset_type:?}, {status:?})");
        self.requests.lock().push((reset_type, status));
    }
}

/// Tests permanent memory before the core moves into it.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait MemoryTest {
    /// `Err(EfiError::DeviceError)` when the range is bad.
    fn test_memory(&self, base: u64, length: u64) -> Result<(), EfiError>;
}

/// Trusts all memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMemoryTest;

impl MemoryTest for NullMemoryTest {
    fn test_memory(&self, _base: u64, _length: u64) -> Result<(), EfiError> {
        Ok(())
    }
}

/// Writes and reads back patterns over a RAM model mapped at `base`.
pub struct PatternMemoryTest {
    base: u64,
    ram: spin::Mutex<Vec<u8>>,
}

impl PatternMemoryTest {
    const PATTERNS: [u8; 3] = [0x55, 0xAA, 0x00];

    pub fn new(base: u64, ram: Vec<u8>) -> Self {
        Self { base, ram: spin::Mutex::new(ram) }
    }
}

impl MemoryTest for PatternMemoryTest {
    fn test_memory(&self, base: u64, length: u64) -> Result<(), EfiError> {
        let mut ram = self.ram.lock();
        let start = base.checked_sub(self.base).and_then(|offset| usize::try_from(offset).ok());
        let end = start.zip(usize::try_from(length).ok()).and_then(|(start, length)| start.checked_add(length));
        let range = match (start, end) {
            (Some(start), Some(end)) if end <= ram.len() => start..end,
            _ => {
                log::error!(target: "pi_phase", "memory test range [{base:#x}, +{length:#x}) is not backed by RAM");
                return Err(EfiError::DeviceError);
            }
        };

        for pattern in Self::PATTERNS {
            ram[range.clone()].fill(pattern);
            if let Some(bad) = ram[range.clone()].iter().position(|byte| *byte != pattern) {
                log::error!(target: "pi_phase", "memory test failed at {:#x}", base + bad as u64);
                return Err(EfiError::DeviceError);
            }
        }
        log::info!(target: "pi_phase", "memory test passed for [{base:#x}, +{length:#x})");
        Ok(())
    }
}

/// Entry point of a loaded image, called with the services of the phase that dispatched it.
pub type EntryPoint<S> = Box<dyn FnOnce(&mut S) -> Result<(), EfiError>>;

/// Where an image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    /// A file in one of the platform firmware volumes.
    FirmwareVolume,
    /// Anything else, such as an option ROM.
    ThirdParty,
}

/// Resolves the PE32 or TE section of a driver file into an entry point.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait ImageLoader<S: 'static> {
    fn load(&self, name: &efi::Guid, image: &[u8]) -> Result<EntryPoint<S>, EfiError>;
}

/// Loads nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullImageLoader;

impl<S: 'static> ImageLoader<S> for NullImageLoader {
    fn load(&self, name: &efi::Guid, _image: &[u8]) -> Result<EntryPoint<S>, EfiError> {
        log::warn!(target: "pi_dispatcher", "no image loader for {}", guid_fmt!(name));
        Err(EfiError::Unsupported)
    }
}

type BuiltinEntry<S> = Arc<dyn Fn(&mut S) -> Result<(), EfiError> + Send + Sync>;

/// Drivers linked into the core, matched by file name.
///
/// The image bytes are only checked to be present; the entry point is the function registered for the file.
pub struct BuiltinImages<S> {
    entries: BTreeMap<OrdGuid, BuiltinEntry<S>>,
}

impl<S> Default for BuiltinImages<S> {
    fn default() -> Self {
        Self { entries: BTreeMap::new() }
    }
}

impl<S> BuiltinImages<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, name: efi::Guid, entry: F) -> Self
    where
        F: Fn(&mut S) -> Result<(), EfiError> + Send + Sync + 'static,
    {
        self.register(name, entry);
        self
    }

    pub fn register<F>(&mut self, name: efi::Guid, entry: F)
    where
        F: Fn(&mut S) -> Result<(), EfiError> + Send + Sync + 'static,
    {
        self.entries.insert(OrdGuid(name), Arc::new(entry));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: 'static> ImageLoader<S> for BuiltinImages<S> {
    fn load(&self, name: &efi::Guid, image: &[u8]) -> Result<EntryPoint<S>, EfiError> {
        if image.is_empty() {
            return Err(EfiError::LoadError);
        }
        let entry = self.entries.get(&OrdGuid(*name)).cloned().ok_or_else(|| {
            log::warn!(target: "pi_dispatcher", "no builtin entry point for {}", guid_fmt!(name));
            EfiError::NotFound
        })?;
        Ok(Box::new(move |services: &mut S| entry(services)))
    }
}

/// Decides whether an image may run.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait SecurityPolicy {
    /// `Err(EfiError::SecurityViolation)` refuses the image.
    fn authenticate(&self, name: &efi::Guid, image: &[u8], origin: ImageOrigin) -> Result<(), EfiError>;
}

/// Allows every image.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllImages;

impl SecurityPolicy for AllowAllImages {
    fn authenticate(&self, _name: &efi::Guid, _image: &[u8], _origin: ImageOrigin) -> Result<(), EfiError> {
        Ok(())
    }
}

/// Refuses the listed files, and every third-party image when `deny_third_party` is set.
#[derive(Debug, Default, Clone)]
pub struct DenyListPolicy {
    denied: Vec<efi::Guid>,
    deny_third_party: bool,
}

impl DenyListPolicy {
    pub fn new(denied: Vec<efi::Guid>) -> Self {
        Self { denied, deny_third_party: false }
    }

    pub fn deny_third_party(mut self) -> Self {
        self.deny_third_party = true;
        self
    }
}

impl SecurityPolicy for DenyListPolicy {
    fn authenticate(&self, name: &efi::Guid, _image: &[u8], origin: ImageOrigin) -> Result<(), EfiError> {
        if self.denied.contains(name) || (self.deny_third_party && origin == ImageOrigin::ThirdParty) {
            log::warn!(target: "pi_dispatcher", "security policy refused {}", guid_fmt!(name));
            return Err(EfiError::SecurityViolation);
        }
        Ok(())
    }
}

/// Raises the SMI that brings every processor into the MM rendezvous.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait MmExecutor {
    fn raise_smi(&self) -> Result<(), EfiError>;
}

/// For single-processor platforms: the BSP enters MM on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMmExecutor;

impl MmExecutor for NullMmExecutor {
    fn raise_smi(&self) -> Result<(), EfiError> {
        Ok(())
    }
}
