//! PI Boot Software Development Kit
//!
//! Common types shared by every crate of the PI boot core: the EFI error taxonomy, base helpers, GUID formatting,
//! the serial logger, and the binary layouts of the Platform Initialization structures (firmware volumes, HOBs,
//! fault tolerant write working blocks, variable stores, and capsules).
//!
//! ## Features
//!
//! - `std`: enables the [`serial::Terminal`] sink backed by the standard output stream.
//! - `serde`: derives `Deserialize` for configuration types such as [`policy::AssertPolicy`].
//! - `mockall`: exposes mocks of the capability traits, such as `runtime::MockVariableStorage`.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

extern crate alloc;

pub mod base;
pub mod error;
pub mod guid;
pub mod log;
pub mod pi;
pub mod policy;
pub mod runtime;
pub mod serial;

pub use guid::{GuidFmt, OrdGuid};

#[doc(hidden)]
pub use r_efi as __r_efi;
