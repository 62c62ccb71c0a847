//! Invariant-violation policy.
//!
//! Firmware traditionally compiles its assertions out of release builds. Here the choice is explicit: a platform
//! picks [`AssertPolicy::Panic`] to halt on a broken invariant, or [`AssertPolicy::LogAndContinue`] to log it and
//! let the caller take its recovery path.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

/// What to do when an internal invariant does not hold.
///
/// Defaults to `Panic` in debug builds and `LogAndContinue` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub enum AssertPolicy {
    /// Log the violation and report it to the caller.
    LogAndContinue,
    /// Panic with the violation message.
    Panic,
}

impl Default for AssertPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            AssertPolicy::Panic
        } else {
            AssertPolicy::LogAndContinue
        }
    }
}

/// Applies `policy` to `condition`.
///
/// Returns `condition`. When it is false the violation is logged, and under [`AssertPolicy::Panic`] the call does
/// not return.
pub fn check(policy: AssertPolicy, condition: bool, message: &str) -> bool {
    if !condition {
        log::error!(target: "pi_phase", "invariant violated: {message}");
        if policy == AssertPolicy::Panic {
            panic!("invariant violated: {message}");
        }
    }
    condition
}
