//! AP work mailboxes.
//!
//! Each AP spins in [`ApMailbox::ap_loop`] on its own slot. The BSP posts a procedure into the slots and waits, with
//! a bound, for the APs to report completion.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU8, Ordering};

use crate::{spin_until, MpError, SpinLock};

/// Work handed to an AP. Receives the AP index.
pub type ApProcedure = Arc<dyn Fn(usize) + Send + Sync>;

const IDLE: u8 = 0;
const POSTED: u8 = 1;
const BUSY: u8 = 2;
const FINISHED: u8 = 3;
const EXIT: u8 = 4;

struct Slot {
    state: AtomicU8,
    work: SpinLock<Option<ApProcedure>>,
}

/// Mailboxes for `ap_count` application processors, indexed from zero.
pub struct ApMailbox {
    slots: Vec<Slot>,
}

impl ApMailbox {
    pub fn new(ap_count: usize) -> Self {
        let slots = (0..ap_count)
            .map(|_| Slot { state: AtomicU8::new(IDLE), work: SpinLock::new(None, "ap_mailbox") })
            .collect();
        Self { slots }
    }

    pub fn ap_count(&self) -> usize {
        self.slots.len()
    }

    /// Body of an AP: run posted work until told to exit.
    pub fn ap_loop(&self, index: usize) -> Result<(), MpError> {
        let slot = self.slots.get(index).ok_or(MpError::InvalidCpu(index))?;
        loop {
            match slot.state.load(Ordering::Acquire) {
                POSTED => {
                    if slot.state.compare_exchange(POSTED, BUSY, Ordering::AcqRel, Ordering::Acquire).is_err() {
                        continue;
                    }
                    let work = slot.work.lock().take();
                    if let Some(work) = work {
                        work(index);
                    }
                    // A shutdown during the work wins over completion.
                    let _ = slot.state.compare_exchange(BUSY, FINISHED, Ordering::AcqRel, Ordering::Acquire);
                }
                EXIT => return Ok(()),
                _ => core::hint::spin_loop(),
            }
        }
    }

    fn post(&self, index: usize, procedure: &ApProcedure) -> Result<(), MpError> {
        let slot = self.slots.get(index).ok_or(MpError::InvalidCpu(index))?;
        match slot.state.load(Ordering::Acquire) {
            IDLE | FINISHED => {
                *slot.work.lock() = Some(Arc::clone(procedure));
                slot.state.store(POSTED, Ordering::Release);
                Ok(())
            }
            _ => Err(MpError::NotReady(index)),
        }
    }

    fn wait_finished(&self, index: usize, timeout_spins: u64) -> bool {
        let slot = &self.slots[index];
        let finished = spin_until(timeout_spins, || slot.state.load(Ordering::Acquire) == FINISHED);
        if finished {
            slot.state.store(IDLE, Ordering::Release);
        }
        finished
    }

    /// Run `procedure` on one AP and wait for it.
    pub fn startup_this_ap(&self, index: usize, procedure: ApProcedure, timeout_spins: u64) -> Result<(), MpError> {
        self.post(index, &procedure)?;
        if !self.wait_finished(index, timeout_spins) {
            log::warn!(target: "pi_mp", "AP {index} did not finish within {timeout_spins} spins");
            return Err(MpError::Timeout);
        }
        Ok(())
    }

    /// Run `procedure` on every AP at once and wait for all of them.
    ///
    /// Nothing is posted unless every AP is free. On timeout the APs that did finish are returned to idle and the
    /// late ones keep their work.
    pub fn startup_all_aps(&self, procedure: ApProcedure, timeout_spins: u64) -> Result<(), MpError> {
        let busy = self.slots.iter().position(|slot| !matches!(slot.state.load(Ordering::Acquire), IDLE | FINISHED));
        if let Some(busy) = busy {
            return Err(MpError::NotReady(busy));
        }
        for index in 0..self.slots.len() {
            self.post(index, &procedure)?;
        }

        let mut late = 0usize;
        for index in 0..self.slots.len() {
            // The bound covers the whole batch: APs run concurrently.
            let budget = if late == 0 { timeout_spins } else { 0 };
            if !self.wait_finished(index, budget) {
                late += 1;
            }
        }
        if late > 0 {
            let total = self.slots.len();
            log::warn!(target: "pi_mp", "{late} of {total} APs did not finish within {timeout_spins} spins");
            return Err(MpError::Timeout);
        }
        log::debug!(target: "pi_mp", "{} APs finished", self.slots.len());
        Ok(())
    }

    /// Tell every AP to leave [`ap_loop`](Self::ap_loop).
    pub fn shutdown(&self) {
        for slot in &self.slots {
            slot.state.store(EXIT, Ordering::Release);
        }
    }
}
