//! PI boot-phase cores
//!
//! This crate drives a platform from SEC hand-off to runtime:
//!
//! - [`PeiCore`] dispatches PEIMs against the PPI database, switches to permanent memory, and produces a
//!   [`Handoff`].
//! - [`DxeCore`] consumes the hand-off, dispatches DXE drivers against the protocol database, and steps through
//!   End-of-DXE, SMM ready-to-lock, BDS, and `ExitBootServices`.
//! - [`MmServices`] holds the MM handler registry and delivers communicate buffers inside the MP rendezvous.
//!
//! Everything the cores need from the platform (reset, memory test, image loading, image authentication, SMI
//! delivery, variable storage) is a capability trait in [`capabilities`] or `pi_sdk::runtime`, chosen when the core
//! is built.
//!
//! ```
//! use pi_boot_core::{CoreConfig, PeiCore, SecHandoff};
//!
//! let sec = SecHandoff { boot_mode: 0, temp_ram_base: 0xFEF0_0000, temp_ram_size: 0x8000, boot_fvs: Vec::new() };
//! let core = PeiCore::new(sec, CoreConfig::default().with_hob_capacity(0x4000)).unwrap();
//! assert_eq!(core.services().phase(), pi_boot_core::Phase::PeiPreMemory);
//! ```
//!
//! ## Features
//!
//! - `std`: build against the standard library.
//! - `serde`: deserialize [`CoreConfig`] (enabled by default).
//! - `mockall`: export the `Mock*` capability implementations.
//! - `lzma`: add the LZMA section codec to the default extractor registry.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

extern crate alloc;

pub mod capabilities;
pub mod config;
pub mod dispatcher;
pub mod dxe;
pub mod error;
pub mod events;
pub mod fv;
pub mod mm;
pub mod pei;
pub mod phase;
pub mod registry;
pub mod runtime;

#[cfg(test)]
mod test_support;

pub use config::CoreConfig;
pub use dispatcher::{DispatchFailure, DispatchReport, Dispatcher};
pub use dxe::{BootServices, DxeCore};
pub use error::{FatalError, PhaseError};
pub use fv::{DriverFile, FvImage};
pub use mm::{MmCommunicateHeader, MmHandler, MmServices};
pub use pei::{Handoff, PeiCore, PeiServices, PermanentMemory, SecHandoff, ServicesHandle};
pub use phase::{Phase, PhaseTracker};
pub use registry::{Interface, InterfaceDb};
pub use runtime::RuntimeServices;
