//! Phase and fatal errors.
//!
//! A [`PhaseError`] is a local, recoverable refusal: the caller asked for something the current boot phase does not
//! allow. A [`FatalError`] means the boot cannot continue; by the time one is returned the platform reset capability
//! has already been asked to reset the system.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt;

use pi_internal_hob::HobError;
use pi_sdk::error::EfiError;

use crate::phase::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseError {
    /// The requested transition is not an edge of the phase state machine.
    IllegalTransition { from: Phase, to: Phase },
    /// MM cannot be entered from this phase.
    MmUnavailable(Phase),
    /// Already executing in MM.
    AlreadyInMm,
    /// Not executing in MM.
    NotInMm,
    /// A services handle minted before the services table moved.
    StaleHandle { handle: u32, current: u32 },
    /// A third-party image was refused between End-of-DXE and SMM ready-to-lock.
    ImageRefused,
    /// The MM handler registry is locked.
    RegistryLocked,
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseError::IllegalTransition { from, to } => write!(f, "illegal phase transition {from} -> {to}"),
            PhaseError::MmUnavailable(phase) => write!(f, "MM is not available in {phase}"),
            PhaseError::AlreadyInMm => write!(f, "already in MM"),
            PhaseError::NotInMm => write!(f, "not in MM"),
            PhaseError::StaleHandle { handle, current } => {
                write!(f, "services handle generation {handle} is stale (current {current})")
            }
            PhaseError::ImageRefused => write!(f, "third-party image refused before SMM ready-to-lock"),
            PhaseError::RegistryLocked => write!(f, "MM handler registry is locked"),
        }
    }
}

impl From<PhaseError> for EfiError {
    fn from(value: PhaseError) -> Self {
        match value {
            PhaseError::IllegalTransition { .. } => EfiError::Unsupported,
            PhaseError::MmUnavailable(_) => EfiError::NotReady,
            PhaseError::AlreadyInMm => EfiError::AlreadyStarted,
            PhaseError::NotInMm => EfiError::NotStarted,
            PhaseError::StaleHandle { .. } => EfiError::InvalidParameter,
            PhaseError::ImageRefused => EfiError::SecurityViolation,
            PhaseError::RegistryLocked => EfiError::AccessDenied,
        }
    }
}

/// An unrecoverable phase-transition failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// The HOB list failed its integrity check.
    HobListCorrupt(HobError),
    /// A HOB could not be created, or the list did not fit its new home.
    HobSpaceExhausted(HobError),
    /// The memory test rejected the permanent memory.
    MemoryTestFailed(EfiError),
    /// PEI ended without installing permanent memory.
    NoPermanentMemory,
    /// The phase state machine refused a transition the core itself requested.
    Phase(PhaseError),
    /// The configuration cannot describe a bootable platform.
    InvalidConfig(EfiError),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::HobListCorrupt(err) => write!(f, "HOB list corrupt: {err}"),
            FatalError::HobSpaceExhausted(err) => write!(f, "HOB space exhausted: {err}"),
            FatalError::MemoryTestFailed(err) => write!(f, "memory test failed: {err:?}"),
            FatalError::NoPermanentMemory => write!(f, "no permanent memory installed by the end of PEI"),
            FatalError::Phase(err) => write!(f, "{err}"),
            FatalError::InvalidConfig(err) => write!(f, "invalid core configuration: {err:?}"),
        }
    }
}

impl From<FatalError> for EfiError {
    fn from(value: FatalError) -> Self {
        match value {
            FatalError::HobListCorrupt(_) => EfiError::CompromisedData,
            FatalError::HobSpaceExhausted(_) => EfiError::OutOfResources,
            FatalError::MemoryTestFailed(err) => err,
            FatalError::NoPermanentMemory => EfiError::NotFound,
            FatalError::Phase(err) => err.into(),
            FatalError::InvalidConfig(err) => err,
        }
    }
}

impl FatalError {
    /// Classify a HOB failure met during a phase transition.
    pub fn from_hob(err: HobError) -> Self {
        match err {
            HobError::OutOfResources { .. } | HobError::RecordTooLarge(_) | HobError::CapacityTooSmall(_) => {
                FatalError::HobSpaceExhausted(err)
            }
            _ => FatalError::HobListCorrupt(err),
        }
    }
}
