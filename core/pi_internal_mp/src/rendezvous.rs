//! MM entry rendezvous.
//!
//! On an SMI every processor enters MM. The BSP opens a session, waits for the APs to check in, runs the MM handler
//! while they are held, then releases them. Sessions are mutually exclusive: a second [`MmRendezvous::bsp_enter`]
//! while one is open fails with [`MpError::AlreadyStarted`].
//!
//! Check-in is a single atomic word: one bit per processor plus a gate bit. The BSP closes the gate with one
//! `fetch_or`, so the participant set it acts on is exactly the set of processors that got in.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use crate::{spin_until, MpError};

/// Largest processor count a rendezvous can track.
pub const MAX_CPUS: usize = 63;

const GATE_CLOSED: u64 = 1 << 63;

/// How the BSP treats APs that are slow to arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub enum SyncMode {
    /// Every processor must arrive. A missing one fails the session with [`MpError::Timeout`].
    #[default]
    Traditional,
    /// Proceed with whichever processors arrived before the timeout.
    RelaxedAp,
}

/// The processors that checked in to a session.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Participants(u64);

impl Participants {
    pub fn contains(&self, cpu: usize) -> bool {
        cpu < MAX_CPUS && self.0 & (1 << cpu) != 0
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_CPUS).filter(|cpu| self.contains(*cpu))
    }
}

impl fmt::Debug for Participants {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Rendezvous for `cpu_count` processors, BSP included.
pub struct MmRendezvous {
    cpu_count: usize,
    mode: SyncMode,
    timeout_spins: u64,
    active: AtomicBool,
    /// Odd while a session is open.
    epoch: AtomicU64,
    checked_in: AtomicU64,
    released: AtomicU64,
    aborted: AtomicBool,
    departed: AtomicUsize,
}

impl MmRendezvous {
    pub fn new(cpu_count: usize, mode: SyncMode, timeout_spins: u64) -> Result<Self, MpError> {
        if cpu_count == 0 || cpu_count > MAX_CPUS {
            return Err(MpError::InvalidCpu(cpu_count));
        }
        Ok(Self {
            cpu_count,
            mode,
            timeout_spins,
            active: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            checked_in: AtomicU64::new(0),
            released: AtomicU64::new(0),
            aborted: AtomicBool::new(false),
            departed: AtomicUsize::new(0),
        })
    }

    pub fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn in_session(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Run `handler` on the BSP with the APs held.
    ///
    /// `handler` receives the processors that arrived. In traditional mode it only runs if all of them did.
    pub fn bsp_enter<R>(&self, bsp: usize, handler: impl FnOnce(Participants) -> R) -> Result<R, MpError> {
        if bsp >= self.cpu_count {
            return Err(MpError::InvalidCpu(bsp));
        }
        if self.active.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            log::warn!(target: "pi_mm", "MM rendezvous already in progress");
            return Err(MpError::AlreadyStarted);
        }

        self.checked_in.store(1 << bsp, Ordering::Relaxed);
        self.departed.store(0, Ordering::Relaxed);
        self.aborted.store(false, Ordering::Relaxed);
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;

        let everyone = (1u64 << self.cpu_count) - 1;
        let all_arrived =
            spin_until(self.timeout_spins, || self.checked_in.load(Ordering::Acquire) & everyone == everyone);
        let participants = Participants(self.checked_in.fetch_or(GATE_CLOSED, Ordering::AcqRel) & everyone);

        let outcome = if all_arrived || self.mode == SyncMode::RelaxedAp {
            if !all_arrived {
                log::info!(
                    target: "pi_mm",
                    "MM rendezvous proceeding with {}/{} processors",
                    participants.count(),
                    self.cpu_count
                );
            }
            Ok(handler(participants))
        } else {
            log::error!(
                target: "pi_mm",
                "MM rendezvous timed out: {}/{} processors arrived",
                participants.count(),
                self.cpu_count
            );
            self.aborted.store(true, Ordering::Release);
            Err(MpError::Timeout)
        };

        // Release the held APs and wait for them to leave before closing the session.
        self.released.store(epoch, Ordering::Release);
        let holding = participants.count() - 1;
        if !spin_until(self.timeout_spins, || self.departed.load(Ordering::Acquire) == holding) {
            log::warn!(target: "pi_mm", "APs slow to leave MM rendezvous");
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.active.store(false, Ordering::Release);
        outcome
    }

    /// Check `cpu` in to the open session and wait to be released.
    ///
    /// Waits up to the timeout for a session to open. An AP that arrives after the BSP closed the gate gets
    /// [`MpError::Excluded`] and does not wait.
    pub fn ap_enter(&self, cpu: usize) -> Result<(), MpError> {
        if cpu >= self.cpu_count {
            return Err(MpError::InvalidCpu(cpu));
        }

        let mut epoch = 0;
        if !spin_until(self.timeout_spins, || {
            epoch = self.epoch.load(Ordering::Acquire);
            epoch % 2 == 1
        }) {
            return Err(MpError::Timeout);
        }

        let bit = 1u64 << cpu;
        let mut current = self.checked_in.load(Ordering::Acquire);
        loop {
            if current & GATE_CLOSED != 0 || self.epoch.load(Ordering::Acquire) != epoch {
                log::debug!(target: "pi_mm", "CPU {cpu} arrived after the rendezvous gate closed");
                return Err(MpError::Excluded);
            }
            match self.checked_in.compare_exchange_weak(current, current | bit, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        // Held until the BSP is done. The BSP always releases, so this wait is unbounded.
        while self.released.load(Ordering::Acquire) != epoch {
            core::hint::spin_loop();
        }
        let aborted = self.aborted.load(Ordering::Acquire);
        self.departed.fetch_add(1, Ordering::AcqRel);
        if aborted {
            Err(MpError::Aborted)
        } else {
            Ok(())
        }
    }
}
