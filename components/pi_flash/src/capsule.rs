//! Capsule discovery and validation.
//!
//! Capsules delivered across a reset are described in the HOB list, either by a `UEFI_CAPSULE` record giving the
//! coalesced capsule's range or by a GUID record named [`CAPSULE_VENDOR_GUID`] whose data is a list of capsule
//! addresses. [`discover_capsules`] resolves both against a [`MemoryView`] and keeps the capsules whose headers are
//! consistent. Authenticating a capsule's payload is left to a platform [`CapsuleAuthenticator`].
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use pi_internal_hob::{Hob, HobList};
use pi_sdk::{
    error::{EfiError, Result},
    pi::capsule::{CapsuleFlags, CapsuleHeader, CAPSULE_VENDOR_GUID},
};
use r_efi::efi;
use scroll::{Pread, LE};

/// Check the header at the start of `bytes` and return it.
///
/// `header_size` and `capsule_image_size` must nest inside `bytes`, and the reset flags must be combined the way
/// `UpdateCapsule` requires.
pub fn validate_capsule(bytes: &[u8]) -> Result<CapsuleHeader> {
    let header: CapsuleHeader = bytes.pread_with(0, LE).map_err(|_| EfiError::InvalidParameter)?;
    let header_size = header.header_size as usize;
    let image_size = header.capsule_image_size as usize;
    if header_size < CapsuleHeader::SIZE || header_size > image_size || image_size > bytes.len() {
        return Err(EfiError::InvalidParameter);
    }

    let flags = header.flags();
    let persist = flags.contains(CapsuleFlags::PERSIST_ACROSS_RESET);
    if !persist && flags.intersects(CapsuleFlags::INITIATE_RESET | CapsuleFlags::POPULATE_SYSTEM_TABLE) {
        return Err(EfiError::InvalidParameter);
    }
    Ok(header)
}

/// Verifies a capsule before it is processed.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait CapsuleAuthenticator {
    fn authenticate(&self, header: &CapsuleHeader, image: &[u8]) -> Result<()>;
}

/// Refuses every capsule.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCapsuleAuthenticator;

impl CapsuleAuthenticator for NullCapsuleAuthenticator {
    fn authenticate(&self, _header: &CapsuleHeader, _image: &[u8]) -> Result<()> {
        Err(EfiError::Unsupported)
    }
}

/// A validated capsule borrowed from memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capsule<'a> {
    pub header: CapsuleHeader,
    /// The whole capsule image, header included.
    pub image: &'a [u8],
}

impl<'a> Capsule<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let header = validate_capsule(bytes)?;
        Ok(Self { header, image: &bytes[..header.capsule_image_size as usize] })
    }

    pub fn guid(&self) -> efi::Guid {
        self.header.capsule_guid()
    }

    /// The payload following the header.
    pub fn body(&self) -> &'a [u8] {
        &self.image[self.header.header_size as usize..]
    }

    pub fn authenticate(&self, authenticator: &dyn CapsuleAuthenticator) -> Result<()> {
        authenticator.authenticate(&self.header, self.image)
    }
}

/// Where a capsule was reported to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapsuleLocation {
    /// From a `UEFI_CAPSULE` record.
    Range { base: u64, length: u64 },
    /// One entry of a [`CAPSULE_VENDOR_GUID`] record. The length comes from the capsule header.
    Address(u64),
}

/// Every capsule location the HOB list reports, in list order.
pub fn capsule_locations(hobs: &HobList) -> Vec<CapsuleLocation> {
    let mut locations = Vec::new();
    for record in hobs.iter() {
        match record.decode() {
            Hob::Capsule(capsule) => {
                locations.push(CapsuleLocation::Range { base: capsule.base_address, length: capsule.length })
            }
            Hob::GuidExtension { name, data } if name == CAPSULE_VENDOR_GUID => {
                locations.extend(
                    data.chunks_exact(8)
                        .filter_map(|entry| entry.pread_with::<u64>(0, LE).ok())
                        .filter(|address| *address != 0)
                        .map(CapsuleLocation::Address),
                );
            }
            _ => {}
        }
    }
    locations
}

/// A window of physical memory.
#[derive(Debug, Clone, Copy)]
pub struct MemoryView<'a> {
    base: u64,
    bytes: &'a [u8],
}

impl<'a> MemoryView<'a> {
    pub fn new(base: u64, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }

    /// `length` bytes at physical `address`, if the view covers them.
    pub fn slice(&self, address: u64, length: usize) -> Option<&'a [u8]> {
        let start = usize::try_from(address.checked_sub(self.base)?).ok()?;
        self.bytes.get(start..start.checked_add(length)?)
    }

    /// Everything from physical `address` to the end of the view.
    pub fn tail(&self, address: u64) -> Option<&'a [u8]> {
        let start = usize::try_from(address.checked_sub(self.base)?).ok()?;
        self.bytes.get(start..)
    }
}

fn resolve<'a>(location: CapsuleLocation, memory: &MemoryView<'a>) -> Result<Capsule<'a>> {
    let bytes = match location {
        CapsuleLocation::Range { base, length } => {
            let length = usize::try_from(length).map_err(|_| EfiError::InvalidParameter)?;
            memory.slice(base, length)
        }
        CapsuleLocation::Address(address) => memory.tail(address),
    };
    Capsule::parse(bytes.ok_or(EfiError::NotFound)?)
}

/// The valid capsules reported by the HOB list. Capsules that are missing from `memory` or malformed are logged
/// and skipped.
pub fn discover_capsules<'a>(hobs: &HobList, memory: &MemoryView<'a>) -> Vec<Capsule<'a>> {
    capsule_locations(hobs)
        .into_iter()
        .filter_map(|location| match resolve(location, memory) {
            Ok(capsule) => {
                log::info!(target: "pi_capsule", "capsule {:?} found at {location:x?}", capsule.guid());
                Some(capsule)
            }
            Err(err) => {
                log::warn!(target: "pi_capsule", "ignoring capsule at {location:x?}: {err:?}");
                None
            }
        })
        .collect()
}

/// Whether the boot mode asks for capsules to be processed.
pub fn is_capsule_update(hobs: &HobList) -> bool {
    hobs.boot_mode() == pi_sdk::pi::boot_mode::BOOT_ON_FLASH_UPDATE
}
