//! Support for the Firmware File System described in the UEFI Platform Initialization Specification.
//!
//! [`volume::VolumeRef`], [`file::FileRef`], and [`section::Section`] parse firmware volumes out of a byte slice with
//! every offset bounds checked; [`volume::Volume`] and [`file::File`] build them back up. Encapsulated sections are
//! expanded through a pluggable [`section::SectionExtractor`].
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod err;
pub mod file;
pub mod section;
pub mod volume;

pub use err::FirmwareFileSystemError;
