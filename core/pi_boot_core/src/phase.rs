//! Boot phase state machine.
//!
//! ```text
//! Sec -> PeiPreMemory -> PeiPostMemory -> DxePreEndOfDxe -> DxePostEndOfDxe -> Bds -> Runtime
//! ```
//!
//! MM is orthogonal: it can be entered from any DXE, BDS, or runtime phase and always returns to the phase it was
//! entered from. No other transition is legal.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt;

use crate::error::PhaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Sec,
    PeiPreMemory,
    PeiPostMemory,
    DxePreEndOfDxe,
    DxePostEndOfDxe,
    Bds,
    Runtime,
}

impl Phase {
    /// The only phase reachable from this one.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Sec => Some(Phase::PeiPreMemory),
            Phase::PeiPreMemory => Some(Phase::PeiPostMemory),
            Phase::PeiPostMemory => Some(Phase::DxePreEndOfDxe),
            Phase::DxePreEndOfDxe => Some(Phase::DxePostEndOfDxe),
            Phase::DxePostEndOfDxe => Some(Phase::Bds),
            Phase::Bds => Some(Phase::Runtime),
            Phase::Runtime => None,
        }
    }

    pub fn is_pei(self) -> bool {
        matches!(self, Phase::PeiPreMemory | Phase::PeiPostMemory)
    }

    pub fn allows_mm(self) -> bool {
        self >= Phase::DxePreEndOfDxe
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Sec => "SEC",
            Phase::PeiPreMemory => "PEI (pre-memory)",
            Phase::PeiPostMemory => "PEI (post-memory)",
            Phase::DxePreEndOfDxe => "DXE (pre End-of-DXE)",
            Phase::DxePostEndOfDxe => "DXE (post End-of-DXE)",
            Phase::Bds => "BDS",
            Phase::Runtime => "Runtime",
        };
        f.write_str(name)
    }
}

/// Tracks the current phase and whether execution is inside MM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTracker {
    phase: Phase,
    in_mm: bool,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub const fn new() -> Self {
        Self { phase: Phase::Sec, in_mm: false }
    }

    /// Resume tracking at `phase`, as a core that picks up a hand-off does.
    pub const fn starting_at(phase: Phase) -> Self {
        Self { phase, in_mm: false }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn in_mm(&self) -> bool {
        self.in_mm
    }

    /// Move to `to`, which must be the successor of the current phase.
    pub fn advance(&mut self, to: Phase) -> Result<(), PhaseError> {
        let from = self.phase;
        if self.in_mm || from.next() != Some(to) {
            log::error!(target: "pi_phase", "illegal phase transition {from} -> {to}");
            return Err(PhaseError::IllegalTransition { from, to });
        }
        self.phase = to;
        log::info!(target: "pi_phase", "phase {from} -> {to}");
        Ok(())
    }

    pub fn enter_mm(&mut self) -> Result<(), PhaseError> {
        if self.in_mm {
            return Err(PhaseError::AlreadyInMm);
        }
        if !self.phase.allows_mm() {
            log::warn!(target: "pi_phase", "MM entry refused in {}", self.phase);
            return Err(PhaseError::MmUnavailable(self.phase));
        }
        self.in_mm = true;
        log::trace!(target: "pi_phase", "entered MM from {}", self.phase);
        Ok(())
    }

    pub fn exit_mm(&mut self) -> Result<(), PhaseError> {
        if !self.in_mm {
            return Err(PhaseError::NotInMm);
        }
        self.in_mm = false;
        log::trace!(target: "pi_phase", "returned from MM to {}", self.phase);
        Ok(())
    }
}
