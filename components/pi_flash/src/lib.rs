//! Flash-backed platform services for the PI boot core
//!
//! - [`nor`]: the [`NorFlash`] device capability and a RAM-backed [`MemoryFlash`].
//! - [`ftw`]: [`FaultTolerantWrite`], block updates that survive power loss by staging through a spare block.
//! - [`variable`]: [`VariableStore`], the non-volatile variable store, usable as the runtime
//!   services variable backend.
//! - [`capsule`]: capsule header validation, discovery from the HOB list, and the [`CapsuleAuthenticator`]
//!   capability.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

extern crate alloc;

pub mod capsule;
pub mod ftw;
pub mod nor;
pub mod variable;

pub use capsule::{Capsule, CapsuleAuthenticator, CapsuleLocation, MemoryView, NullCapsuleAuthenticator};
pub use ftw::{FaultTolerantWrite, FtwError, Recovery};
pub use nor::{MemoryFlash, NorFlash, NullFlash};
pub use variable::{Variable, VariableStore};
