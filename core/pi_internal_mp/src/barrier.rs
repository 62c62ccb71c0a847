//! Reusable processor barrier (`MpSerializeStart` / `MpSerializeEnd`).
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{spin_until, MpError, SpinLock};

/// Holds a fixed number of processors in lockstep.
///
/// Each round completes when every participant has called [`wait`](Self::wait). A participant that runs out of
/// spins breaks the barrier: it and every later waiter get an error until [`reset`](Self::reset).
pub struct MpSerializer {
    participants: usize,
    timeout_spins: u64,
    arrived: AtomicUsize,
    generation: AtomicUsize,
    broken: AtomicBool,
    section: SpinLock<()>,
}

impl MpSerializer {
    pub const fn new(participants: usize, timeout_spins: u64) -> Self {
        Self {
            participants,
            timeout_spins,
            arrived: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
            broken: AtomicBool::new(false),
            section: SpinLock::new((), "mp_serialize"),
        }
    }

    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Wait for every participant. Returns the round that completed.
    pub fn wait(&self) -> Result<usize, MpError> {
        if self.broken.load(Ordering::Acquire) {
            return Err(MpError::Broken);
        }

        let generation = self.generation.load(Ordering::Acquire);
        if self.arrived.fetch_add(1, Ordering::AcqRel) + 1 == self.participants {
            self.arrived.store(0, Ordering::Relaxed);
            self.generation.fetch_add(1, Ordering::Release);
            return Ok(generation);
        }

        let mut broken = false;
        let released = spin_until(self.timeout_spins, || {
            broken = self.broken.load(Ordering::Acquire);
            broken || self.generation.load(Ordering::Acquire) != generation
        });
        if broken {
            return Err(MpError::Broken);
        }
        if !released {
            self.broken.store(true, Ordering::Release);
            log::warn!(
                target: "pi_mp",
                "MP serialize timed out in round {generation} ({}/{} arrived)",
                self.arrived.load(Ordering::Acquire),
                self.participants
            );
            return Err(MpError::Timeout);
        }
        Ok(generation)
    }

    /// Barrier before a lockstep section.
    pub fn start(&self) -> Result<usize, MpError> {
        self.wait()
    }

    /// Barrier after a lockstep section.
    pub fn end(&self) -> Result<usize, MpError> {
        self.wait()
    }

    /// Gather, run `f` one processor at a time, gather again.
    pub fn serialize<R>(&self, f: impl FnOnce() -> R) -> Result<R, MpError> {
        self.start()?;
        let result = {
            let _guard = self.section.lock();
            f()
        };
        self.end()?;
        Ok(result)
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Clear a broken barrier. Nobody may be waiting.
    pub fn reset(&mut self) {
        *self.arrived.get_mut() = 0;
        *self.broken.get_mut() = false;
    }
}
