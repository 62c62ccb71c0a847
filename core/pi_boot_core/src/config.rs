//! Core configuration.
//!
//! Built in code with the `with_*` methods, or deserialized from YAML (or any serde format) with the `serde`
//! feature. Missing fields take their defaults.
//!
//! ```rust
//! use pi_boot_core::CoreConfig;
//! use pi_internal_mp::SyncMode;
//!
//! let config = CoreConfig::default().with_cpu_count(4).with_mm_sync_mode(SyncMode::RelaxedAp);
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use pi_internal_mp::{SyncMode, DEFAULT_TIMEOUT_SPINS, MAX_CPUS};
use pi_sdk::{base::SIZE_64KB, error::EfiError, policy::AssertPolicy};

/// Smallest HOB region the cores accept.
pub const MIN_HOB_CAPACITY: usize = 0x400;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(default, deny_unknown_fields))]
pub struct CoreConfig {
    /// Upper bound on dispatcher passes per phase.
    pub max_dispatch_passes: usize,
    /// What to do when an internal invariant does not hold.
    pub assert_policy: AssertPolicy,
    /// Size of the HOB region in permanent memory.
    pub hob_capacity: usize,
    pub mm_sync_mode: SyncMode,
    /// Spin bound for every MP wait.
    pub mm_timeout_spins: u64,
    /// Logical processors, BSP included.
    pub cpu_count: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_dispatch_passes: 64,
            assert_policy: AssertPolicy::default(),
            hob_capacity: SIZE_64KB,
            mm_sync_mode: SyncMode::Traditional,
            mm_timeout_spins: DEFAULT_TIMEOUT_SPINS,
            cpu_count: 1,
        }
    }
}

impl CoreConfig {
    pub fn with_max_dispatch_passes(mut self, passes: usize) -> Self {
        self.max_dispatch_passes = passes;
        self
    }

    pub fn with_assert_policy(mut self, policy: AssertPolicy) -> Self {
        self.assert_policy = policy;
        self
    }

    pub fn with_hob_capacity(mut self, capacity: usize) -> Self {
        self.hob_capacity = capacity;
        self
    }

    pub fn with_mm_sync_mode(mut self, mode: SyncMode) -> Self {
        self.mm_sync_mode = mode;
        self
    }

    pub fn with_mm_timeout_spins(mut self, spins: u64) -> Self {
        self.mm_timeout_spins = spins;
        self
    }

    pub fn with_cpu_count(mut self, cpu_count: usize) -> Self {
        self.cpu_count = cpu_count;
        self
    }

    /// Reject values no platform can boot with.
    pub fn validate(&self) -> Result<(), EfiError> {
        if self.max_dispatch_passes == 0 {
            log::error!(target: "pi_phase", "max_dispatch_passes must be at least 1");
            return Err(EfiError::InvalidParameter);
        }
        if self.hob_capacity < MIN_HOB_CAPACITY {
            log::error!(target: "pi_phase", "hob_capacity {:#x} is below {MIN_HOB_CAPACITY:#x}", self.hob_capacity);
            return Err(EfiError::InvalidParameter);
        }
        if self.cpu_count == 0 || self.cpu_count > MAX_CPUS {
            log::error!(target: "pi_phase", "cpu_count {} is outside 1..={MAX_CPUS}", self.cpu_count);
            return Err(EfiError::InvalidParameter);
        }
        Ok(())
    }
}
