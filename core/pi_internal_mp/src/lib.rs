//! Multi-processor synchronization for the PI boot core
//!
//! Boot firmware runs on one processor. The other logical processors (APs) are parked and only ever do two things:
//! run a procedure the bootstrap processor (BSP) hands them, or gather at a rendezvous when the system enters MM.
//! This crate holds the primitives for that:
//!
//! - [`SpinLock`]: a named lock over [`spin::Mutex`].
//! - [`MpSerializer`]: a reusable barrier with a bounded spin, for lockstep sections.
//! - [`ApMailbox`]: per-AP work slots and [`ApMailbox::startup_all_aps`].
//! - [`MmRendezvous`]: the MM entry rendezvous in [`SyncMode::Traditional`] or [`SyncMode::RelaxedAp`].
//!
//! Every wait is bounded by a spin count. A timed-out wait returns [`MpError::Timeout`] instead of hanging.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod barrier;
mod lock;
mod mailbox;
mod rendezvous;

pub use barrier::MpSerializer;
pub use lock::SpinLock;
pub use mailbox::{ApMailbox, ApProcedure};
pub use rendezvous::{MmRendezvous, Participants, SyncMode, MAX_CPUS};

use core::fmt;

use pi_sdk::error::EfiError;

/// Default bound on every spin wait.
pub const DEFAULT_TIMEOUT_SPINS: u64 = 0x1000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpError {
    /// A bounded wait ran out of spins.
    Timeout,
    /// A rendezvous session is already running.
    AlreadyStarted,
    /// The AP is still running earlier work.
    NotReady(usize),
    /// No such processor.
    InvalidCpu(usize),
    /// The processor arrived after the rendezvous closed its gate.
    Excluded,
    /// The session this processor joined was abandoned by the BSP.
    Aborted,
    /// A participant timed out earlier and the barrier must be reset.
    Broken,
}

impl fmt::Display for MpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpError::NotReady(cpu) => write!(f, "AP {cpu} is busy"),
            MpError::InvalidCpu(cpu) => write!(f, "no processor {cpu}"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

impl From<MpError> for EfiError {
    fn from(value: MpError) -> Self {
        match value {
            MpError::Timeout => EfiError::Timeout,
            MpError::AlreadyStarted => EfiError::AlreadyStarted,
            MpError::NotReady(_) => EfiError::NotReady,
            MpError::InvalidCpu(_) => EfiError::InvalidParameter,
            MpError::Excluded | MpError::Aborted => EfiError::Aborted,
            MpError::Broken => EfiError::DeviceError,
        }
    }
}

/// Spin until `done` returns true or `timeout_spins` iterations pass. Returns whether `done` became true.
pub(crate) fn spin_until(timeout_spins: u64, mut done: impl FnMut() -> bool) -> bool {
    let mut spins = 0u64;
    while !done() {
        if spins >= timeout_spins {
            return false;
        }
        spins += 1;
        core::hint::spin_loop();
    }
    true
}
